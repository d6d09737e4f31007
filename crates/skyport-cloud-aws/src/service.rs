//! Service catalogue
//!
//! Sibling API families that share the Query transport conventions. Each
//! family knows its signing name, API version, envelope dialect and
//! pagination field names.

use crate::config::AccessEnv;
use crate::error::{AwsError, Result};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Response envelope shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Result fields are children of the document root
    Ec2,
    /// Result fields are nested in `<{Operation}Result>`
    Query,
}

impl Dialect {
    pub fn for_service_id(service_id: &str) -> Self {
        if service_id == "EC2" {
            Dialect::Ec2
        } else {
            Dialect::Query
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceFamily {
    Ec2,
    Iam,
    Sts,
    Rds,
    ElastiCache,
    Elbv2,
    CloudWatch,
}

impl ServiceFamily {
    pub const ALL: [ServiceFamily; 7] = [
        ServiceFamily::Ec2,
        ServiceFamily::Iam,
        ServiceFamily::Sts,
        ServiceFamily::Rds,
        ServiceFamily::ElastiCache,
        ServiceFamily::Elbv2,
        ServiceFamily::CloudWatch,
    ];

    /// Endpoint prefix and SigV4 signing name
    pub fn service_name(&self) -> &'static str {
        match self {
            ServiceFamily::Ec2 => "ec2",
            ServiceFamily::Iam => "iam",
            ServiceFamily::Sts => "sts",
            ServiceFamily::Rds => "rds",
            ServiceFamily::ElastiCache => "elasticache",
            ServiceFamily::Elbv2 => "elasticloadbalancing",
            ServiceFamily::CloudWatch => "monitoring",
        }
    }

    pub fn service_id(&self) -> &'static str {
        match self {
            ServiceFamily::Ec2 => "EC2",
            ServiceFamily::Iam => "IAM",
            ServiceFamily::Sts => "STS",
            ServiceFamily::Rds => "RDS",
            ServiceFamily::ElastiCache => "ElastiCache",
            ServiceFamily::Elbv2 => "Elastic Load Balancing v2",
            ServiceFamily::CloudWatch => "CloudWatch",
        }
    }

    pub fn api_version(&self) -> &'static str {
        match self {
            ServiceFamily::Ec2 => "2016-11-15",
            ServiceFamily::Iam => "2010-05-08",
            ServiceFamily::Sts => "2011-06-15",
            ServiceFamily::Rds => "2014-10-31",
            ServiceFamily::ElastiCache => "2015-02-02",
            ServiceFamily::Elbv2 => "2015-12-01",
            ServiceFamily::CloudWatch => "2010-08-01",
        }
    }

    pub fn dialect(&self) -> Dialect {
        Dialect::for_service_id(self.service_id())
    }

    /// IAM has one endpoint per partition
    pub fn is_global(&self) -> bool {
        matches!(self, ServiceFamily::Iam)
    }

    /// Request parameter carrying the continuation token
    pub fn cursor_field(&self) -> &'static str {
        match self {
            ServiceFamily::Ec2 | ServiceFamily::CloudWatch => "NextToken",
            _ => "Marker",
        }
    }

    /// Request parameter carrying the page size
    pub fn page_size_field(&self) -> &'static str {
        match self {
            ServiceFamily::Ec2 => "MaxResults",
            ServiceFamily::Rds | ServiceFamily::ElastiCache | ServiceFamily::CloudWatch => {
                "MaxRecords"
            }
            ServiceFamily::Iam | ServiceFamily::Sts => "MaxItems",
            ServiceFamily::Elbv2 => "PageSize",
        }
    }

    /// Largest page size the family accepts
    pub fn max_page_size(&self) -> u32 {
        match self {
            ServiceFamily::Ec2 | ServiceFamily::Iam | ServiceFamily::Sts => 1000,
            ServiceFamily::Elbv2 => 400,
            ServiceFamily::Rds | ServiceFamily::ElastiCache | ServiceFamily::CloudWatch => 100,
        }
    }

    fn endpoint_for(&self, region: &str) -> (String, String) {
        let env = AccessEnv::for_region(region);
        let suffix = env.domain_suffix();
        if self.is_global() {
            return match env {
                AccessEnv::Global => (format!("https://iam.{}", suffix), "us-east-1".to_string()),
                AccessEnv::China => (
                    format!("https://iam.{}.{}", region, suffix),
                    region.to_string(),
                ),
            };
        }
        (
            format!("https://{}.{}.{}", self.service_name(), region, suffix),
            region.to_string(),
        )
    }
}

impl fmt::Display for ServiceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service_name())
    }
}

impl FromStr for ServiceFamily {
    type Err = AwsError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_lowercase();
        ServiceFamily::ALL
            .into_iter()
            .find(|f| f.service_name() == lower || f.service_id().to_lowercase() == lower)
            .or(match lower.as_str() {
                "elbv2" | "elb" => Some(ServiceFamily::Elbv2),
                _ => None,
            })
            .ok_or_else(|| AwsError::Config(format!("unknown service family '{}'", s)))
    }
}

/// Immutable per-(family, region) request target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    pub family: ServiceFamily,
    pub service_name: String,
    pub service_id: String,
    pub api_version: String,
    pub signing_region: String,
    pub endpoint: Url,
}

impl ServiceTarget {
    pub fn resolve(family: ServiceFamily, region: &str, endpoint_override: Option<&str>) -> Result<Self> {
        if region.is_empty()
            || !region
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(AwsError::Endpoint(format!("invalid region id '{}'", region)));
        }

        let (default_endpoint, signing_region) = family.endpoint_for(region);
        let endpoint_str = endpoint_override.unwrap_or(&default_endpoint);
        let endpoint = Url::parse(endpoint_str)
            .map_err(|e| AwsError::Endpoint(format!("{}: {}", endpoint_str, e)))?;

        Ok(Self {
            family,
            service_name: family.service_name().to_string(),
            service_id: family.service_id().to_string(),
            api_version: family.api_version().to_string(),
            signing_region,
            endpoint,
        })
    }

    pub fn dialect(&self) -> Dialect {
        Dialect::for_service_id(&self.service_id)
    }
}

/// One named vendor API call. The HTTP method follows from how the call is
/// made: POST for [`RequestBuilder::build`](crate::RequestBuilder::build),
/// GET for presigned URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub name: String,
    pub service_path: String,
}

impl Operation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service_path: "/".to_string(),
        }
    }

    /// Name of the Dialect B wrapper element
    pub fn result_element(&self) -> String {
        format!("{}Result", self.name)
    }
}

impl From<&str> for Operation {
    fn from(name: &str) -> Self {
        Operation::new(name)
    }
}

impl From<String> for Operation {
    fn from(name: String) -> Self {
        Operation::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_selection() {
        assert_eq!(ServiceFamily::Ec2.dialect(), Dialect::Ec2);
        for family in ServiceFamily::ALL.into_iter().filter(|f| *f != ServiceFamily::Ec2) {
            assert_eq!(family.dialect(), Dialect::Query, "{}", family);
        }
    }

    #[test]
    fn test_regional_endpoint() {
        let target = ServiceTarget::resolve(ServiceFamily::Rds, "eu-west-1", None).unwrap();
        assert_eq!(target.endpoint.as_str(), "https://rds.eu-west-1.amazonaws.com/");
        assert_eq!(target.signing_region, "eu-west-1");
        assert_eq!(target.api_version, "2014-10-31");
    }

    #[test]
    fn test_china_endpoint() {
        let target = ServiceTarget::resolve(ServiceFamily::Ec2, "cn-north-1", None).unwrap();
        assert_eq!(target.endpoint.as_str(), "https://ec2.cn-north-1.amazonaws.com.cn/");
    }

    #[test]
    fn test_iam_is_global() {
        let target = ServiceTarget::resolve(ServiceFamily::Iam, "ap-northeast-1", None).unwrap();
        assert_eq!(target.endpoint.as_str(), "https://iam.amazonaws.com/");
        assert_eq!(target.signing_region, "us-east-1");
    }

    #[test]
    fn test_endpoint_override() {
        let target =
            ServiceTarget::resolve(ServiceFamily::Sts, "us-east-1", Some("http://127.0.0.1:4566"))
                .unwrap();
        assert_eq!(target.endpoint.as_str(), "http://127.0.0.1:4566/");
        assert_eq!(target.signing_region, "us-east-1");
    }

    #[test]
    fn test_invalid_region() {
        assert!(ServiceTarget::resolve(ServiceFamily::Ec2, "", None).is_err());
        assert!(ServiceTarget::resolve(ServiceFamily::Ec2, "us east", None).is_err());
    }

    #[test]
    fn test_parse_family() {
        assert_eq!("ec2".parse::<ServiceFamily>().unwrap(), ServiceFamily::Ec2);
        assert_eq!("ELBv2".parse::<ServiceFamily>().unwrap(), ServiceFamily::Elbv2);
        assert_eq!("monitoring".parse::<ServiceFamily>().unwrap(), ServiceFamily::CloudWatch);
        assert!("s3".parse::<ServiceFamily>().is_err());
    }

    #[test]
    fn test_page_size_caps() {
        for family in ServiceFamily::ALL {
            assert!(family.max_page_size() <= 1000);
        }
    }
}
