//! Account-level calls

use crate::dispatcher::Dispatcher;
use crate::params::ParameterMap;
use crate::service::ServiceFamily;
use crate::shape::ItemSet;
use serde::{Deserialize, Serialize};
use skyport_cloud::Result;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct RegionInfo {
    #[serde(rename = "regionName")]
    pub name: String,
    #[serde(rename = "regionEndpoint", default)]
    pub endpoint: String,
    #[serde(rename = "optInStatus", default, skip_serializing_if = "Option::is_none")]
    pub opt_in_status: Option<String>,
}

/// `DescribeRegions` result (EC2 envelope)
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct RegionsResult {
    #[serde(rename = "regionInfo", default)]
    pub regions: ItemSet<RegionInfo>,
}

/// `GetCallerIdentity` result (Query envelope)
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CallerIdentity {
    pub arn: String,
    pub user_id: String,
    pub account: String,
}

/// All regions visible to the account, including ones not opted in
pub async fn describe_regions(dispatcher: &Dispatcher, region: &str) -> Result<Vec<RegionInfo>> {
    let result: RegionsResult = dispatcher
        .call(
            ServiceFamily::Ec2,
            region,
            "DescribeRegions",
            ParameterMap::new().with("AllRegions", true),
        )
        .await?;
    tracing::debug!("Account sees {} regions", result.regions.len());
    Ok(result.regions.into_vec())
}

pub async fn get_caller_identity(dispatcher: &Dispatcher, region: &str) -> Result<CallerIdentity> {
    dispatcher
        .call(ServiceFamily::Sts, region, "GetCallerIdentity", ParameterMap::new())
        .await
}
