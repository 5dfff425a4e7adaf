#![allow(unused_macros)]

/// Emits a debug log line only when the given configuration has verbose logging enabled
///
/// ```rust, ignore
///  verbose!(self.config, "[PatchType] Patching {}", name);
/// ```
macro_rules! verbose {
    ($config:expr, $($arg:tt)*) => {
        if $config.verbose {
            log::debug!($($arg)*);
        }
    };
}
