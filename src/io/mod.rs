//! Where job input comes from and where results go.

pub mod reader;
pub mod writer;
