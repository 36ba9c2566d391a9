// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::Endpoint;
use crate::cloud::InstanceInventory;
use crate::error::{Error, Result};

/// Resolve the network address to dial for `endpoint`.
///
/// Cloud-backed endpoints look up the instance and take the private or public
/// address according to the endpoint's policy. A missing preferred address is
/// `NotFound`; the other family is never substituted. Plain endpoints return
/// `host` verbatim. No retries.
pub async fn resolved_address(
    endpoint: &Endpoint,
    inventory: &dyn InstanceInventory,
) -> Result<String> {
    let Some(identity) = endpoint.instance() else {
        return Ok(endpoint.host().to_string());
    };

    let record = inventory.describe_instance(&identity.instance_id).await?;

    let (family, address) = if endpoint.use_private_address() {
        ("private", record.private_ip)
    } else {
        ("public", record.public_ip)
    };

    match address.filter(|a| !a.trim().is_empty()) {
        Some(address) => {
            tracing::debug!(
                instance = %identity.instance_id,
                family,
                %address,
                "Resolved instance address"
            );
            Ok(address)
        }
        None => Err(Error::NotFound(format!(
            "instance {} has no {} address",
            identity.instance_id, family
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{CloudError, InstanceIdentity, InstanceRecord};
    use crate::error::ErrorKind;
    use async_trait::async_trait;

    struct OneInstance(InstanceRecord);

    #[async_trait]
    impl InstanceInventory for OneInstance {
        async fn describe_instance(&self, instance_id: &str) -> std::result::Result<InstanceRecord, CloudError> {
            if instance_id == self.0.instance_id {
                Ok(self.0.clone())
            } else {
                Err(CloudError::NotFound(instance_id.to_string()))
            }
        }
    }

    fn record(private_ip: Option<&str>, public_ip: Option<&str>) -> OneInstance {
        OneInstance(InstanceRecord {
            instance_id: "i-0abc1234".to_string(),
            availability_zone: "ap-northeast-2a".to_string(),
            private_ip: private_ip.map(str::to_string),
            public_ip: public_ip.map(str::to_string),
        })
    }

    fn cloud_endpoint(private: bool) -> Endpoint {
        Endpoint::new("i-0abc1234", 22, "ec2-user")
            .unwrap()
            .with_instance(InstanceIdentity::new("i-0abc1234", "ap-northeast-2a"))
            .with_private_address(private)
    }

    #[tokio::test]
    async fn test_plain_endpoint_uses_host_verbatim() {
        let inventory = record(None, None);
        let endpoint = Endpoint::new("bastion.example.com", 22, "ec2-user").unwrap();
        assert_eq!(
            resolved_address(&endpoint, &inventory).await.unwrap(),
            "bastion.example.com"
        );
    }

    #[tokio::test]
    async fn test_private_policy_never_uses_public() {
        let inventory = record(Some("10.0.1.20"), Some("203.0.113.5"));
        assert_eq!(
            resolved_address(&cloud_endpoint(true), &inventory).await.unwrap(),
            "10.0.1.20"
        );
        assert_eq!(
            resolved_address(&cloud_endpoint(false), &inventory).await.unwrap(),
            "203.0.113.5"
        );
    }

    #[tokio::test]
    async fn test_no_fallback_between_families() {
        let inventory = record(None, Some("203.0.113.5"));
        let err = resolved_address(&cloud_endpoint(true), &inventory)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let inventory = record(Some("10.0.1.20"), None);
        let err = resolved_address(&cloud_endpoint(false), &inventory)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_unknown_instance() {
        let inventory = record(Some("10.0.1.20"), None);
        let endpoint = Endpoint::new("i-ffff0000", 22, "ec2-user")
            .unwrap()
            .with_instance(InstanceIdentity::new("i-ffff0000", "ap-northeast-2a"));
        let err = resolved_address(&endpoint, &inventory).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
