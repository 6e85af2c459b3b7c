//! S3 XML serialization of response documents.
//!
//! Each document type writes its children; [`to_xml`] adds the declaration
//! and the namespaced root element.

use std::io::{self, Write};

use chrono::{DateTime, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesText, Event};

use crate::error::XmlError;
use crate::types::{
    BucketEntry, CompleteMultipartUploadResult, CopyResult, InitiateMultipartUploadResult,
    ListAllMyBucketsResult, ListBucketResult, ListMultipartUploadsResult, ListPartsResult,
    ObjectEntry, Owner, PartEntry, UploadEntry,
};

/// The S3 XML namespace.
pub const S3_NAMESPACE: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Types that serialize as S3 XML child elements.
///
/// Uses `io::Result` because `quick_xml::Writer` closures require it.
pub trait S3Serialize {
    /// Write this value's child elements into `writer`.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if writing to the underlying writer fails.
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()>;
}

/// Serialize `value` as a complete document under `root_element`.
///
/// # Errors
///
/// Returns `XmlError` if serialization fails.
pub fn to_xml<T: S3Serialize>(root_element: &str, value: &T) -> Result<Vec<u8>, XmlError> {
    let mut buf = Vec::with_capacity(512);
    let mut writer = Writer::new(&mut buf);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer
        .create_element(root_element)
        .with_attribute(("xmlns", S3_NAMESPACE))
        .write_inner_content(|w| value.serialize_xml(w))?;

    Ok(buf)
}

/// Format a timestamp the way S3 listings do (`2006-02-03T16:45:09.000Z`).
#[must_use]
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S.000Z").to_string()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn write_text_element<W: Write>(writer: &mut Writer<W>, tag: &str, text: &str) -> io::Result<()> {
    writer
        .create_element(tag)
        .write_text_content(BytesText::new(text))?;
    Ok(())
}

fn write_optional_text<W: Write>(
    writer: &mut Writer<W>,
    tag: &str,
    value: Option<&str>,
) -> io::Result<()> {
    if let Some(v) = value {
        write_text_element(writer, tag, v)?;
    }
    Ok(())
}

fn write_bool<W: Write>(writer: &mut Writer<W>, tag: &str, value: bool) -> io::Result<()> {
    write_text_element(writer, tag, if value { "true" } else { "false" })
}

fn write_number<W: Write>(
    writer: &mut Writer<W>,
    tag: &str,
    value: impl ToString,
) -> io::Result<()> {
    write_text_element(writer, tag, &value.to_string())
}

fn write_timestamp<W: Write>(
    writer: &mut Writer<W>,
    tag: &str,
    value: &DateTime<Utc>,
) -> io::Result<()> {
    write_text_element(writer, tag, &format_timestamp(value))
}

fn write_owner<W: Write>(writer: &mut Writer<W>, tag: &str, owner: &Owner) -> io::Result<()> {
    writer.create_element(tag).write_inner_content(|w| {
        write_text_element(w, "ID", &owner.id)?;
        write_text_element(w, "DisplayName", &owner.display_name)?;
        Ok(())
    })?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

impl S3Serialize for BucketEntry {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        writer.create_element("Bucket").write_inner_content(|w| {
            write_text_element(w, "Name", &self.name)?;
            write_timestamp(w, "CreationDate", &self.creation_date)?;
            Ok(())
        })?;
        Ok(())
    }
}

impl S3Serialize for ListAllMyBucketsResult {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_owner(writer, "Owner", &self.owner)?;
        writer.create_element("Buckets").write_inner_content(|w| {
            for bucket in &self.buckets {
                bucket.serialize_xml(w)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

impl S3Serialize for ObjectEntry {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        writer.create_element("Contents").write_inner_content(|w| {
            write_text_element(w, "Key", &self.key)?;
            write_timestamp(w, "LastModified", &self.last_modified)?;
            write_text_element(w, "ETag", &self.etag)?;
            write_number(w, "Size", self.size)?;
            write_text_element(w, "StorageClass", &self.storage_class)?;
            Ok(())
        })?;
        Ok(())
    }
}

impl S3Serialize for ListBucketResult {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_text_element(writer, "Name", &self.name)?;
        write_text_element(writer, "Prefix", &self.prefix)?;
        write_number(writer, "KeyCount", self.key_count)?;
        write_number(writer, "MaxKeys", self.max_keys)?;
        write_optional_text(writer, "Delimiter", self.delimiter.as_deref())?;
        write_bool(writer, "IsTruncated", self.is_truncated)?;
        write_optional_text(
            writer,
            "ContinuationToken",
            self.continuation_token.as_deref(),
        )?;
        write_optional_text(
            writer,
            "NextContinuationToken",
            self.next_continuation_token.as_deref(),
        )?;
        write_optional_text(writer, "StartAfter", self.start_after.as_deref())?;
        for obj in &self.contents {
            obj.serialize_xml(writer)?;
        }
        for prefix in &self.common_prefixes {
            writer
                .create_element("CommonPrefixes")
                .write_inner_content(|w| write_text_element(w, "Prefix", prefix))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Multipart
// ---------------------------------------------------------------------------

impl S3Serialize for InitiateMultipartUploadResult {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_text_element(writer, "Bucket", &self.bucket)?;
        write_text_element(writer, "Key", &self.key)?;
        write_text_element(writer, "UploadId", &self.upload_id)?;
        Ok(())
    }
}

impl S3Serialize for PartEntry {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        writer.create_element("Part").write_inner_content(|w| {
            write_number(w, "PartNumber", self.part_number)?;
            if let Some(ref modified) = self.last_modified {
                write_timestamp(w, "LastModified", modified)?;
            }
            write_text_element(w, "ETag", &self.etag)?;
            write_number(w, "Size", self.size)?;
            for (tag, value) in &self.checksums {
                write_text_element(w, tag, value)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

impl S3Serialize for ListPartsResult {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_text_element(writer, "Bucket", &self.bucket)?;
        write_text_element(writer, "Key", &self.key)?;
        write_text_element(writer, "UploadId", &self.upload_id)?;
        write_number(writer, "PartNumberMarker", self.part_number_marker)?;
        if let Some(next) = self.next_part_number_marker {
            write_number(writer, "NextPartNumberMarker", next)?;
        }
        write_number(writer, "MaxParts", self.max_parts)?;
        write_bool(writer, "IsTruncated", self.is_truncated)?;
        write_owner(writer, "Initiator", &self.owner)?;
        write_owner(writer, "Owner", &self.owner)?;
        write_text_element(writer, "StorageClass", &self.storage_class)?;
        for part in &self.parts {
            part.serialize_xml(writer)?;
        }
        Ok(())
    }
}

impl S3Serialize for UploadEntry {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        writer.create_element("Upload").write_inner_content(|w| {
            write_text_element(w, "Key", &self.key)?;
            write_text_element(w, "UploadId", &self.upload_id)?;
            write_text_element(w, "StorageClass", &self.storage_class)?;
            write_timestamp(w, "Initiated", &self.initiated)?;
            Ok(())
        })?;
        Ok(())
    }
}

impl S3Serialize for ListMultipartUploadsResult {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_text_element(writer, "Bucket", &self.bucket)?;
        write_text_element(writer, "Prefix", &self.prefix)?;
        write_number(writer, "MaxUploads", self.max_uploads)?;
        write_bool(writer, "IsTruncated", self.is_truncated)?;
        for upload in &self.uploads {
            upload.serialize_xml(writer)?;
        }
        Ok(())
    }
}

impl S3Serialize for CompleteMultipartUploadResult {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_text_element(writer, "Location", &self.location)?;
        write_text_element(writer, "Bucket", &self.bucket)?;
        write_text_element(writer, "Key", &self.key)?;
        write_text_element(writer, "ETag", &self.etag)?;
        Ok(())
    }
}

impl S3Serialize for CopyResult {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_text_element(writer, "ETag", &self.etag)?;
        write_timestamp(writer, "LastModified", &self.last_modified)?;
        Ok(())
    }
}
