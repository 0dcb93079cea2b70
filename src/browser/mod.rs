pub mod driver;
pub mod manager;
pub mod scripts;

#[cfg(test)]
pub mod fake;

#[cfg(test)]
mod tests;

pub use driver::{BrowserDriver, DriverError, DriverResult, RawElement, RawSnapshot, StabilityProbe};
pub use manager::ChromeBrowser;
