pub mod contract;
pub mod outcome;
pub mod stage;
