//! EC2 implementation of [`soak_core::Provisioner`].

mod ec2;
mod error;

pub use ec2::{Ec2Provisioner, Ec2Session};
pub use error::classify_sdk_error;
