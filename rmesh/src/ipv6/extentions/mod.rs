//! IPv6 extension headers.

mod ext;
pub use ext::{ExtHeader, EXT_HEADER_LEN, HBH_HEADER_TEMPLATE};

mod frag;
pub use frag::{divisible_by_eight, FragHeader, FRAG_HEADER_LEN, FRAG_HEADER_TEMPLATE};
