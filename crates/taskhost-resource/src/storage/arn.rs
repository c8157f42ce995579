//! S3 object ARN parsing.
//!
//! Accepts `arn:<partition>:s3:::<bucket>/<key>`. Anything else is rejected
//! with [`TaskhostError::Address`]; a locator is never guessed at.

use taskhost_common::error::{Result, TaskhostError};

const ARN_PREFIX: &str = "arn:";
const ARN_SECTIONS: usize = 6;
const S3_SERVICE: &str = "s3";

/// Location of an object in a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    /// Partition the bucket lives in, e.g. `aws` or `aws-cn`.
    pub partition: String,
    /// Bucket name.
    pub bucket: String,
    /// Object key inside the bucket.
    pub key: String,
}

/// Parses an S3 object ARN.
///
/// # Errors
///
/// Returns [`TaskhostError::Address`] if `locator` is not an ARN, names a
/// service other than S3, or its resource is not `bucket/key`.
pub fn parse_s3_arn(locator: &str) -> Result<ObjectLocation> {
    let invalid = |message: &str| TaskhostError::Address {
        locator: locator.to_string(),
        message: message.to_string(),
    };

    if !locator.starts_with(ARN_PREFIX) {
        return Err(invalid("arn must start with \"arn:\""));
    }
    let sections: Vec<&str> = locator.splitn(ARN_SECTIONS, ':').collect();
    if sections.len() != ARN_SECTIONS {
        return Err(invalid("not enough sections"));
    }
    let (partition, service, resource) = (sections[1], sections[2], sections[5]);
    if partition.is_empty() {
        return Err(invalid("missing partition"));
    }
    if service != S3_SERVICE {
        return Err(invalid("not an s3 arn"));
    }

    let Some((bucket, key)) = resource.split_once('/') else {
        return Err(invalid("resource is not in the form bucket/key"));
    };
    if bucket.is_empty() || key.is_empty() {
        return Err(invalid("resource is not in the form bucket/key"));
    }

    Ok(ObjectLocation {
        partition: partition.to_string(),
        bucket: bucket.to_string(),
        key: key.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bucket_and_nested_key() {
        let loc = parse_s3_arn("arn:aws:s3:::my-bucket/firelens/extra.conf").expect("parse");
        assert_eq!(loc.partition, "aws");
        assert_eq!(loc.bucket, "my-bucket");
        assert_eq!(loc.key, "firelens/extra.conf");
    }

    #[test]
    fn parses_other_partitions() {
        let loc = parse_s3_arn("arn:aws-cn:s3:::b/k").expect("parse");
        assert_eq!(loc.partition, "aws-cn");
    }

    #[test]
    fn rejects_non_arn() {
        let err = parse_s3_arn("s3://bucket/key").unwrap_err();
        assert!(matches!(err, TaskhostError::Address { .. }));
    }

    #[test]
    fn rejects_too_few_sections() {
        assert!(parse_s3_arn("arn:aws:s3:bucket/key").is_err());
    }

    #[test]
    fn rejects_other_services() {
        let err = parse_s3_arn("arn:aws:ecs:us-west-2:123:task/abc").unwrap_err();
        assert!(err.to_string().contains("not an s3 arn"));
    }

    #[test]
    fn rejects_bucket_without_key() {
        assert!(parse_s3_arn("arn:aws:s3:::bucket").is_err());
        assert!(parse_s3_arn("arn:aws:s3:::bucket/").is_err());
        assert!(parse_s3_arn("arn:aws:s3:::/key").is_err());
    }
}
