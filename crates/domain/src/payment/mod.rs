//! Payment attempts and their state machine.

mod model;
mod status;

pub use model::Payment;
pub use status::{PaymentProvider, PaymentStatus};
