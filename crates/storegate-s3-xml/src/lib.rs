//! S3 XML documents for the storegate S3 front-end.
//!
//! Only the documents the gateway exercises are modelled: bucket and object
//! listings, the multipart family, copy results and error bodies.
//!
//! # Key components
//!
//! - [`types`] holds the document structs
//! - [`S3Serialize`] and [`to_xml`] write response bodies
//! - [`S3Deserialize`] and [`from_xml`] parse request bodies
//! - [`error_to_xml`] formats the flat `<Error>` body
//!
//! # S3 XML conventions
//!
//! - Namespace: `http://s3.amazonaws.com/doc/2006-03-01/`
//! - Booleans: lowercase `true`/`false`
//! - Timestamps: `2006-02-03T16:45:09.000Z`
//! - XML declaration: `<?xml version="1.0" encoding="UTF-8"?>`

pub mod deserialize;
pub mod error;
pub mod serialize;
pub mod types;

pub use deserialize::{S3Deserialize, from_xml};
pub use error::{XmlError, error_to_xml};
pub use serialize::{S3_NAMESPACE, S3Serialize, format_timestamp, to_xml};
