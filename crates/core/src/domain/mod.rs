pub mod participant;
pub mod scope;
