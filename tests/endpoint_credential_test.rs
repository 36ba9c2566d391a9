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

//! Address policy and credential provisioning against the mock cloud.

mod common;

use chrono::Duration as ChronoDuration;
use common::{Harness, MockClock, MockCloud};
use hopgate::cloud::CloudError;
use hopgate::config::CredentialSettings;
use hopgate::credential::{Clock, CredentialProvisioner, KeyAlgorithm};
use hopgate::endpoint::{resolved_address, EndpointDefaults};
use hopgate::{Endpoint, ErrorKind, InstanceIdentity};
use std::sync::Arc;

const INSTANCE: &str = "i-0a1b2c3d4e5f60718";

fn provisioner(cloud: &Arc<MockCloud>, clock: &Arc<MockClock>) -> CredentialProvisioner {
    CredentialProvisioner::new(
        cloud.clone(),
        clock.clone(),
        &CredentialSettings::default(),
    )
}

#[tokio::test]
async fn test_private_policy_ignores_public_address() {
    let h = Harness::new();
    h.cloud
        .add_instance(INSTANCE, Some("203.0.113.5"), Some("10.0.1.20"));

    let public = Endpoint::from_record(&h.cloud.record(INSTANCE), "ec2-user", 22).unwrap();
    let private = public.clone().with_private_address(true);

    assert_eq!(
        resolved_address(&public, h.cloud.as_ref()).await.unwrap(),
        "203.0.113.5"
    );
    for _ in 0..3 {
        assert_eq!(
            resolved_address(&private, h.cloud.as_ref()).await.unwrap(),
            "10.0.1.20"
        );
    }
}

#[tokio::test]
async fn test_missing_preferred_address_does_not_fall_back() {
    let h = Harness::new();
    h.cloud.add_instance(INSTANCE, Some("203.0.113.5"), None);
    let endpoint = Endpoint::from_record(&h.cloud.record(INSTANCE), "ec2-user", 22)
        .unwrap()
        .with_private_address(true);

    let err = resolved_address(&endpoint, h.cloud.as_ref())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_instance_endpoint_from_spec() {
    let h = Harness::new();
    h.cloud
        .add_instance(INSTANCE, Some("203.0.113.5"), Some("10.0.1.20"));
    let defaults = EndpointDefaults {
        use_private_address: true,
        ..Default::default()
    };

    let endpoint = Endpoint::for_instance(
        &format!("ubuntu@{INSTANCE}:2222"),
        h.cloud.as_ref(),
        &defaults,
    )
    .await
    .unwrap();
    assert_eq!(endpoint.user(), "ubuntu");
    assert_eq!(endpoint.port(), 2222);
    assert_eq!(
        endpoint.instance(),
        Some(&InstanceIdentity::new(INSTANCE, common::ZONE))
    );
    assert_eq!(
        resolved_address(&endpoint, h.cloud.as_ref()).await.unwrap(),
        "10.0.1.20"
    );

    let err = Endpoint::for_instance("i-0000000000000000f", h.cloud.as_ref(), &defaults)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_validity_window_follows_the_clock() {
    let h = Harness::new();
    h.cloud.add_instance(INSTANCE, None, Some("10.0.1.20"));
    let provisioner = provisioner(&h.cloud, &h.clock);
    let identity = h.cloud.record(INSTANCE).identity();

    let started = h.clock.now();
    let credential = provisioner.provision(&identity, "ec2-user").await.unwrap();
    assert_eq!(credential.valid_from(), started);
    assert_eq!(
        credential.valid_until(),
        started + ChronoDuration::seconds(60)
    );
    assert!(h
        .cloud
        .is_authorized("10.0.1.20", "ec2-user", &credential.private_key()));
    assert!(!h
        .cloud
        .is_authorized("10.0.1.20", "root", &credential.private_key()));

    h.clock.advance(ChronoDuration::seconds(60));
    assert!(!credential.is_valid_at(h.clock.now()));
    assert!(!h
        .cloud
        .is_authorized("10.0.1.20", "ec2-user", &credential.private_key()));
}

#[tokio::test]
async fn test_reprovisioning_keeps_earlier_keys_valid() {
    let h = Harness::new();
    h.cloud.add_instance(INSTANCE, None, Some("10.0.1.20"));
    let provisioner = provisioner(&h.cloud, &h.clock);
    let identity = h.cloud.record(INSTANCE).identity();

    let first = provisioner.provision(&identity, "ec2-user").await.unwrap();
    h.clock.advance(ChronoDuration::seconds(30));
    let second = provisioner.provision(&identity, "ec2-user").await.unwrap();

    assert!(h
        .cloud
        .is_authorized("10.0.1.20", "ec2-user", &first.private_key()));
    assert!(h
        .cloud
        .is_authorized("10.0.1.20", "ec2-user", &second.private_key()));

    h.clock.advance(ChronoDuration::seconds(45));
    assert!(!h
        .cloud
        .is_authorized("10.0.1.20", "ec2-user", &first.private_key()));
    assert!(h
        .cloud
        .is_authorized("10.0.1.20", "ec2-user", &second.private_key()));
}

#[tokio::test]
async fn test_provisioning_failures_are_classified() {
    let h = Harness::new();
    let provisioner = provisioner(&h.cloud, &h.clock);

    let unknown = InstanceIdentity::new(INSTANCE, common::ZONE);
    let err = provisioner.provision(&unknown, "ec2-user").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    h.cloud.add_instance(INSTANCE, None, Some("10.0.1.20"));
    h.cloud
        .fail_registrations_with(CloudError::Unavailable("endpoint unreachable".into()));
    let err = provisioner.provision(&unknown, "ec2-user").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_rsa_credential() {
    let h = Harness::new();
    h.cloud.add_instance(INSTANCE, None, Some("10.0.1.20"));
    let provisioner = provisioner(&h.cloud, &h.clock);
    let identity = h.cloud.record(INSTANCE).identity();

    let credential = provisioner
        .provision_with(&identity, "ec2-user", provisioner.rsa_algorithm())
        .await
        .unwrap();
    assert_eq!(credential.algorithm(), KeyAlgorithm::Rsa { bits: 2048 });
    assert!(credential.public_key_openssh().starts_with("ssh-rsa "));
    assert!(h
        .cloud
        .is_authorized("10.0.1.20", "ec2-user", &credential.private_key()));
}
