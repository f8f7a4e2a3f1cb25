pub mod b32_hex;
pub mod networks;
pub mod preset;
