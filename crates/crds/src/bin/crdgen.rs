//! Prints the CloudOps CustomResourceDefinitions as a multi-document YAML stream.
//!
//! `cargo run -p crds --bin crdgen > config/crd/cloudops.yaml`

use crds::{ElasticIP, NetworkInterface};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [ElasticIP::crd(), NetworkInterface::crd()];
    for crd in &crds {
        let yaml = serde_yaml::to_string(crd)
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("---\n{}", yaml.trim_end());
    }
    Ok(())
}
