use once_cell::sync::OnceCell;

/// Installs the test log subscriber once per test binary.
pub fn init() {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}
