/// One-shot tracing initialization for the hosting process.
///
/// Called at the start of `App::new()`. Safe to call more than once; later
/// calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley_core=debug,info".into()),
        )
        .try_init();
}
