pub mod series;
pub mod transform;
pub mod tsv;
pub mod types;
