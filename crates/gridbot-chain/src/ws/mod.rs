/*
[INPUT]:  n/a
[OUTPUT]: Module wiring for the account-history streaming facade.
[POS]:    Transport layer - module wiring.
[UPDATE]: When adding new streaming facilities.
*/

pub mod stream;

pub use stream::{ConnectionState, SubscriptionFacade};
