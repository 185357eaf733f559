//! Transport layer module.

pub mod btle;
pub mod mock;
pub mod observable;
pub mod traits;

pub use btle::BtleLink;
pub use mock::{MockLink, WriteRecord};
pub use observable::ObservableLink;
pub use traits::{LinkEvent, LinkEvents, OtaLink, TransportError, WriteMode};
