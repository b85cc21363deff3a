//! EC2 security-group connection
//!
//! Production implementation of the [`Connector`]/[`Connection`] traits
//! over `aws-sdk-ec2`. Lookups translate peer-group ids back to human
//! names so the returned rule sets are canonical; authorize/revoke
//! translate names to ids when the group lives in a VPC.

use crate::aws::error::{not_found_as_not_visible, to_remote_error};
use crate::remote::{Connection, Connector, ErrorCode, RemoteError, RemoteGroup};
use crate::rule::{Protocol, Rule, RuleSet, RuleSource};
use async_trait::async_trait;
use aws_sdk_ec2::types::{Filter, IpPermission, IpRange, SecurityGroup, UserIdGroupPair};
use aws_sdk_ec2::Client;
use tracing::debug;

/// Connector producing one [`AwsConnection`] per region and pass
///
/// A credential identifier selects a named profile; `None` uses the
/// ambient environment credentials.
#[derive(Debug, Clone, Default)]
pub struct AwsConnector;

#[async_trait]
impl Connector for AwsConnector {
    type Conn = AwsConnection;

    async fn connect(
        &self,
        region: &str,
        credentials: Option<&str>,
    ) -> Result<AwsConnection, RemoteError> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()));
        if let Some(profile) = credentials {
            loader = loader.profile_name(profile);
        }
        let config = loader.load().await;
        debug!(region = %region, "connected EC2 client");
        Ok(AwsConnection {
            client: Client::new(&config),
        })
    }
}

/// One EC2 client scoped to a region
#[derive(Debug, Clone)]
pub struct AwsConnection {
    client: Client,
}

impl AwsConnection {
    /// Build the canonical [`RemoteGroup`] from an SDK security group,
    /// translating peer ids to names where the group is VPC-scoped
    async fn convert_group(&self, sg: &SecurityGroup) -> Result<RemoteGroup, RemoteError> {
        let id = sg
            .group_id()
            .ok_or_else(|| RemoteError::new(ErrorCode::Other, "security group without id"))?
            .to_string();
        let name = sg.group_name().unwrap_or_default().to_string();
        let description = sg.description().unwrap_or_default().to_string();
        let scope = sg.vpc_id().map(str::to_string);

        let mut rules = RuleSet::new();
        for perm in sg.ip_permissions() {
            let protocol: Protocol = perm
                .ip_protocol()
                .unwrap_or("tcp")
                .parse()
                .map_err(|e| RemoteError::new(ErrorCode::Other, format!("{}", e)))?;
            let from_port = perm.from_port().unwrap_or(0);
            let to_port = perm.to_port().unwrap_or(0);

            for range in perm.ip_ranges() {
                if let Some(cidr) = range.cidr_ip() {
                    rules.insert(Rule::cidr(protocol, from_port, to_port, cidr));
                }
            }
            for pair in perm.user_id_group_pairs() {
                let peer_name = match (scope.as_deref(), pair.group_id(), pair.group_name()) {
                    // Inside a VPC the API reports peers by opaque id
                    // only; canonical form wants the name.
                    (Some(_), Some(peer_id), _) => self.translate_peer_id_to_name(peer_id).await?,
                    (None, _, Some(peer_name)) => peer_name.to_string(),
                    (None, Some(peer_id), None) => self.translate_peer_id_to_name(peer_id).await?,
                    _ => continue,
                };
                rules.insert(Rule::group(
                    protocol,
                    from_port,
                    to_port,
                    peer_name,
                    pair.user_id().map(str::to_string),
                ));
            }
        }

        Ok(RemoteGroup {
            id,
            name,
            description,
            scope,
            rules,
        })
    }

    /// Resolve a peer group name to its id within a VPC
    async fn translate_peer_name_to_id(
        &self,
        name: &str,
        scope: &str,
    ) -> Result<String, RemoteError> {
        let resp = self
            .client
            .describe_security_groups()
            .filters(Filter::builder().name("group-name").values(name).build())
            .filters(Filter::builder().name("vpc-id").values(scope).build())
            .send()
            .await
            .map_err(to_remote_error)?;

        resp.security_groups()
            .first()
            .and_then(|g| g.group_id())
            .map(str::to_string)
            .ok_or_else(|| {
                // A peer created moments ago may not be visible yet.
                RemoteError::new(
                    ErrorCode::NotVisibleYet,
                    format!("security group `{}` not visible in {}", name, scope),
                )
            })
    }

    async fn permission_for(
        &self,
        group: &RemoteGroup,
        rule: &Rule,
    ) -> Result<IpPermission, RemoteError> {
        let mut builder = IpPermission::builder()
            .ip_protocol(rule.protocol.to_string())
            .from_port(rule.from_port)
            .to_port(rule.to_port);

        match &rule.source {
            RuleSource::Cidr(cidr) => {
                builder = builder.ip_ranges(IpRange::builder().cidr_ip(cidr).build());
            }
            RuleSource::Group { name, owner_id } => {
                let mut pair = UserIdGroupPair::builder();
                match group.scope.as_deref() {
                    Some(scope) => {
                        pair = pair.group_id(self.translate_peer_name_to_id(name, scope).await?);
                    }
                    None => {
                        pair = pair.group_name(name);
                    }
                }
                if let Some(owner) = owner_id {
                    pair = pair.user_id(owner);
                }
                builder = builder.user_id_group_pairs(pair.build());
            }
        }

        Ok(builder.build())
    }
}

#[async_trait]
impl Connection for AwsConnection {
    async fn lookup_by_id(&self, id: &str) -> Result<RemoteGroup, RemoteError> {
        let resp = self
            .client
            .describe_security_groups()
            .group_ids(id)
            .send()
            .await
            .map_err(to_remote_error)?;

        match resp.security_groups().first() {
            Some(sg) => self.convert_group(sg).await,
            None => Err(RemoteError::new(
                ErrorCode::NotFound,
                format!("security group {} not found", id),
            )),
        }
    }

    async fn lookup_by_name(&self, name: &str) -> Result<RemoteGroup, RemoteError> {
        let resp = self
            .client
            .describe_security_groups()
            .group_names(name)
            .send()
            .await
            .map_err(to_remote_error)?;

        match resp.security_groups().first() {
            Some(sg) => self.convert_group(sg).await,
            None => Err(RemoteError::new(
                ErrorCode::NotFound,
                format!("security group `{}` not found", name),
            )),
        }
    }

    async fn create(
        &self,
        name: &str,
        description: &str,
        scope: Option<&str>,
    ) -> Result<String, RemoteError> {
        let mut request = self
            .client
            .create_security_group()
            .group_name(name)
            .description(description);
        if let Some(vpc_id) = scope {
            request = request.vpc_id(vpc_id);
        }

        let resp = request.send().await.map_err(to_remote_error)?;
        let id = resp
            .group_id()
            .ok_or_else(|| RemoteError::new(ErrorCode::Other, "no group id in create response"))?
            .to_string();
        debug!(group = %name, id = %id, "created security group");
        Ok(id)
    }

    async fn authorize(&self, group: &RemoteGroup, rule: &Rule) -> Result<(), RemoteError> {
        let permission = self.permission_for(group, rule).await?;
        self.client
            .authorize_security_group_ingress()
            .group_id(&group.id)
            .ip_permissions(permission)
            .send()
            .await
            .map_err(|e| not_found_as_not_visible(to_remote_error(e)))?;
        Ok(())
    }

    async fn revoke(&self, group: &RemoteGroup, rule: &Rule) -> Result<(), RemoteError> {
        let permission = self.permission_for(group, rule).await?;
        self.client
            .revoke_security_group_ingress()
            .group_id(&group.id)
            .ip_permissions(permission)
            .send()
            .await
            .map_err(to_remote_error)?;
        Ok(())
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), RemoteError> {
        self.client
            .delete_security_group()
            .group_id(id)
            .send()
            .await
            .map_err(to_remote_error)?;
        Ok(())
    }

    async fn delete_by_name(&self, name: &str) -> Result<(), RemoteError> {
        self.client
            .delete_security_group()
            .group_name(name)
            .send()
            .await
            .map_err(to_remote_error)?;
        Ok(())
    }

    async fn translate_peer_id_to_name(&self, id: &str) -> Result<String, RemoteError> {
        let resp = self
            .client
            .describe_security_groups()
            .group_ids(id)
            .send()
            .await
            .map_err(to_remote_error)?;

        resp.security_groups()
            .first()
            .and_then(|g| g.group_name())
            .map(str::to_string)
            .ok_or_else(|| {
                RemoteError::new(
                    ErrorCode::NotFound,
                    format!("security group {} not found", id),
                )
            })
    }
}
