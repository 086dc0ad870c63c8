pub mod binary;
pub mod string;
pub mod variable_byte;

pub use binary::{binary_len, decode_binary, encode_binary};
pub use string::{decode_string, encode_string, string_len};
pub use variable_byte::{
    decode_variable_int, encode_variable_int, variable_int_len, VARIABLE_BYTE_INT_MAX,
};
