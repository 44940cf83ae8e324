pub mod attack;
pub mod decision;
pub mod request;
