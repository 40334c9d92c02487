//! Shared fixtures for integration tests.

use tfops_controller::crd::Terraform;

/// A run named `demo` in `default`, parsed from YAML like a user would write it
///
/// `config` is inserted under `spec.config`, indented by four spaces.
pub fn demo_run(config: &str, generation: i64) -> Terraform {
    let yaml = format!(
        r#"
apiVersion: tf.tfops.io/v1alpha1
kind: Terraform
metadata:
  name: demo
  namespace: default
  uid: 0f6b1c2e-demo
  generation: {generation}
spec:
  stack:
    source:
      address: git::https://github.com/example/stacks.git//network?ref=v1.2.0
    terraformVersion: 0.12.29
  config:
{config}
"#
    );
    serde_yaml::from_str(&yaml).expect("demo run should deserialize")
}
