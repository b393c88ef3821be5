//! Maps `Box<dyn Error>` from trait boundaries to typed `TopoffError`.
//!
//! The traits in `topoff_traits` use `Box<dyn Error + Send + Sync>` for maximum
//! flexibility; this module converts those to our typed error enum, with an
//! optional feature-gated path for `topoff_hardware::HwError` downcasting.

use crate::error::TopoffError;

/// Map a GPIO/pump error to a typed `TopoffError`.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> TopoffError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<topoff_hardware::error::HwError>() {
            return TopoffError::Hardware(hw.to_string());
        }
    }

    if let Some(te) = e.downcast_ref::<TopoffError>() {
        return te.clone();
    }
    TopoffError::Hardware(e.to_string())
}

/// Map a persistence error to `TopoffError::Storage`.
pub fn map_store_error(e: &(dyn std::error::Error + 'static)) -> TopoffError {
    TopoffError::Storage(e.to_string())
}
