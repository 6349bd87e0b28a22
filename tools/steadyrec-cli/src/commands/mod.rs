pub mod check;
pub mod config;
pub mod orphans;
pub mod record;
