//! Reading and writing simulation inputs.

pub mod system_file;
