//! Column and table value model.
pub mod array;
pub mod bitmap;
pub mod column;
pub mod compute;
pub mod datatype;
pub mod field;
pub mod scalar;
pub mod table;
