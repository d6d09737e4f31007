#![allow(dead_code)]

use async_trait::async_trait;
use skyport_cloud_aws::{
    AccessEnv, AwsClientConfig, AwsError, Dispatcher, RawResponse, ServiceTarget, Transport,
};
use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DESCRIBE_REGIONS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<DescribeRegionsResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
    <requestId>59dbff89-35bd-4eac-99ed-be587EXAMPLE</requestId>
    <regionInfo>
        <item>
            <regionName>us-east-1</regionName>
            <regionEndpoint>ec2.us-east-1.amazonaws.com</regionEndpoint>
            <optInStatus>opt-in-not-required</optInStatus>
        </item>
        <item>
            <regionName>ap-east-1</regionName>
            <regionEndpoint>ec2.ap-east-1.amazonaws.com</regionEndpoint>
            <optInStatus>not-opted-in</optInStatus>
        </item>
    </regionInfo>
</DescribeRegionsResponse>"#;

/// DescribeRegions cut off before the closing tags
pub const DESCRIBE_REGIONS_TRUNCATED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<DescribeRegionsResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
    <requestId>59dbff89-35bd-4eac-99ed-be587EXAMPLE</requestId>
    <regionInfo>
        <item>
            <regionName>us-east-1</regionName>
            <regionEndpoint>ec2.us-east-1.amazonaws.com</regionEndpoint>
        </item>
        <item>
            <regionName>ap-east-1"#;

pub const GET_CALLER_IDENTITY: &str = r#"<GetCallerIdentityResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <GetCallerIdentityResult>
    <Arn>arn:aws:iam::123456789012:user/alice</Arn>
    <UserId>AIDACKCEVSQ6C2EXAMPLE</UserId>
    <Account>123456789012</Account>
  </GetCallerIdentityResult>
  <ResponseMetadata>
    <RequestId>01234567-89ab-cdef-0123-456789abcdef</RequestId>
  </ResponseMetadata>
</GetCallerIdentityResponse>"#;

pub const RETURN_TRUE: &str = r#"<AuthorizeSecurityGroupIngressResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
    <requestId>b1f8b1d2-0000-0000-0000-000000000000</requestId>
    <return>true</return>
</AuthorizeSecurityGroupIngressResponse>"#;

pub fn ec2_error(code: &str, message: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response><Errors><Error><Code>{}</Code><Message>{}</Message></Error></Errors><RequestID>ec2-error-req</RequestID></Response>"#,
        code, message
    )
}

pub fn query_error(code: &str, message: &str) -> String {
    format!(
        r#"<ErrorResponse xmlns="https://iam.amazonaws.com/doc/2010-05-08/">
  <Error><Type>Sender</Type><Code>{}</Code><Message>{}</Message></Error>
  <RequestId>query-error-req</RequestId>
</ErrorResponse>"#,
        code, message
    )
}

/// IAM ListUsers page; `marker` is placed inside the result element
pub fn list_users_page(users: &[&str], marker: Option<&str>) -> String {
    let members: String = users
        .iter()
        .map(|u| {
            format!(
                "<member><UserName>{}</UserName><Arn>arn:aws:iam::123456789012:user/{}</Arn></member>",
                u, u
            )
        })
        .collect();
    let marker = marker
        .map(|m| format!("<IsTruncated>true</IsTruncated><Marker>{}</Marker>", m))
        .unwrap_or_else(|| "<IsTruncated>false</IsTruncated>".to_string());
    format!(
        r#"<ListUsersResponse xmlns="https://iam.amazonaws.com/doc/2010-05-08/">
  <ListUsersResult><Users>{}</Users>{}</ListUsersResult>
  <ResponseMetadata><RequestId>7a62c49f-347e-4fc4-9331-6e8eEXAMPLE</RequestId></ResponseMetadata>
</ListUsersResponse>"#,
        members, marker
    )
}

pub fn security_group(group_id: &str, ingress: &str, egress: &str) -> String {
    format!(
        r#"<DescribeSecurityGroupsResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
    <requestId>1d62eae0-acdd-481d-88c9-EXAMPLE</requestId>
    <securityGroupInfo>
        <item>
            <ownerId>123456789012</ownerId>
            <groupId>{}</groupId>
            <groupName>web</groupName>
            <groupDescription>web tier</groupDescription>
            <ipPermissions>{}</ipPermissions>
            <ipPermissionsEgress>{}</ipPermissionsEgress>
        </item>
    </securityGroupInfo>
</DescribeSecurityGroupsResponse>"#,
        group_id, ingress, egress
    )
}

pub fn tcp_permission(from: i32, to: i32, cidr: &str) -> String {
    format!(
        "<item><ipProtocol>tcp</ipProtocol><fromPort>{}</fromPort><toPort>{}</toPort>\
         <groups/><ipRanges><item><cidrIp>{}</cidrIp></item></ipRanges><ipv6Ranges/><prefixListIds/></item>",
        from, to, cidr
    )
}

pub const ALL_EGRESS: &str = "<item><ipProtocol>-1</ipProtocol><groups/>\
    <ipRanges><item><cidrIp>0.0.0.0/0</cidrIp></item></ipRanges><ipv6Ranges/><prefixListIds/></item>";

/// One request as seen by [`FakeTransport`]
#[derive(Debug, Clone)]
pub struct Recorded {
    pub service: String,
    pub params: BTreeMap<String, String>,
    pub signed: bool,
}

impl Recorded {
    pub fn action(&self) -> &str {
        self.params.get("Action").map(String::as_str).unwrap_or_default()
    }
}

pub enum Reply {
    Xml(u16, String),
    /// Never answers
    Hang,
    /// Answers 200 with `prefix`, then the body stalls until cancelled
    Stall(String),
}

/// Body that stalls after its first bytes, the way a streamed body does
/// when the peer stops sending
struct StalledBody {
    prefix: Cursor<Vec<u8>>,
    cancel: CancellationToken,
    dropped: Arc<AtomicBool>,
}

impl Read for StalledBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.prefix.read(buf)?;
        if n > 0 {
            return Ok(n);
        }
        while !self.cancel.is_cancelled() {
            std::thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::other("stream cancelled"))
    }
}

impl Drop for StalledBody {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

/// Scripted in-memory transport
#[derive(Default)]
pub struct FakeTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<Recorded>>,
    body_dropped: Arc<AtomicBool>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, status: u16, body: impl Into<String>) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Reply::Xml(status, body.into()));
        self
    }

    pub fn hang(&self) -> &Self {
        self.replies.lock().unwrap().push_back(Reply::Hang);
        self
    }

    pub fn stall(&self, prefix: impl Into<String>) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Reply::Stall(prefix.into()));
        self
    }

    /// Whether the last stalled body has been released
    pub fn body_dropped(&self) -> bool {
        self.body_dropped.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| r.action().to_string())
            .collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn execute(
        &self,
        target: &ServiceTarget,
        request: http::Request<String>,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, AwsError> {
        let params = url::form_urlencoded::parse(request.body().as_bytes())
            .into_owned()
            .collect();
        self.requests.lock().unwrap().push(Recorded {
            service: target.service_name.clone(),
            params,
            signed: request.headers().contains_key("authorization"),
        });

        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Xml(status, body)) => Ok(RawResponse::new(
                status,
                "fake-req",
                Cursor::new(body.into_bytes()),
            )),
            Some(Reply::Stall(prefix)) => {
                self.body_dropped.store(false, Ordering::SeqCst);
                let body = StalledBody {
                    prefix: Cursor::new(prefix.into_bytes()),
                    cancel: cancel.clone(),
                    dropped: self.body_dropped.clone(),
                };
                Ok(RawResponse::new(200, "fake-req", body))
            }
            Some(Reply::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            None => Err(AwsError::Internal("no scripted reply left".to_string())),
        }
    }
}

pub fn test_config() -> AwsClientConfig {
    AwsClientConfig::new(AccessEnv::Global, "AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY")
}

pub fn fake_dispatcher(transport: &Arc<FakeTransport>) -> Dispatcher {
    fake_dispatcher_with(test_config(), transport)
}

pub fn fake_dispatcher_with(config: AwsClientConfig, transport: &Arc<FakeTransport>) -> Dispatcher {
    Dispatcher::new(config).with_transport(transport.clone())
}
