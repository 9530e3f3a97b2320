//! Binary primitives shared by the KDL compiler and the runtime resource
//! manager: big-endian byte buffers in the classic resource-fork widths, the
//! compiled [`Resource`] record, and the container that bundles resources.
//!
//! ```
//! use kdl_format::*;
//!
//! let resource = Resource::new(TypeCode(*b"simg"), "StaticImage", 128, "Logo", vec![0xCA, 0xFE]);
//! let blob = encode_container(&[resource.clone()]);
//! assert_eq!(decode_container(&blob).unwrap(), vec![resource]);
//! ```

pub mod bb;
pub mod container;
pub mod resource;

pub use bb::*;
pub use container::*;
pub use resource::*;
