pub mod callback;
pub mod currency;
pub mod money;
pub mod operation;
pub mod ports;
pub mod transaction;
