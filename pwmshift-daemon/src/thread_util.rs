//! Helper for spawning named threads
//!
//! Thread names show up in panic messages and in `top -H`, which is the
//! quickest way to tell the listener from the auto-cycle worker on a Pi.

use std::io;
use std::thread::JoinHandle;

/// Spawn a thread with a name.
///
/// Linux truncates thread names to 15 bytes.
///
/// # Example
/// ```ignore
/// spawn_named("udp-listener", || { /* ... */ })?;
/// ```
pub fn spawn_named<F, T>(name: &str, f: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    std::thread::Builder::new().name(name.to_string()).spawn(f)
}
