use std::panic;

/// Pretty backtraces on stderr, and the panic message in the log file
/// before the default hook runs.
///
/// The hook returns so unwinding continues: a panic on the main thread still
/// ends the process, while a render worker's `catch_unwind` can recover.
pub fn initialize_panic_handler() {
    better_panic::install();

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        log::error!("Panic: {panic_info}");
        log::logger().flush();

        default_hook(panic_info);
    }));
}
