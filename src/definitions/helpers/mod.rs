pub mod bytestr;

pub use bytestr::ByteStr;
