#![deny(dead_code)]
#![deny(unused_imports)]

pub mod basis;
pub mod config;
pub mod coverage;
pub mod linalg;
pub mod ols;
pub mod report;
pub mod simulate;
