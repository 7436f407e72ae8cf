//! ---
//! acct_section: "02-energy-accounting"
//! acct_subsection: "example"
//! acct_type: "source"
//! acct_scope: "code"
//! acct_description: "Energy backend dispatch, sample codec, and sampler."
//! acct_version: "v0.0.0-prealpha"
//! acct_owner: "tbd"
//! ---
use std::sync::Arc;

use acct_gather_energy::{
    decode, encode, BackendRegistry, EnergyContext, InlineConfLoader, ProtocolVersion,
};

fn main() -> anyhow::Result<()> {
    // Node A meters itself with the synthetic backend.
    let mut options = toml::Table::new();
    options.insert("SyntheticWatts".into(), toml::Value::Integer(240));
    let registry = Arc::new(BackendRegistry::with_builtin());
    let node_a = EnergyContext::new("acct_gather_energy/synthetic", registry)
        .with_conf_loader(InlineConfLoader::new(options));
    node_a.update_node_energy()?;
    let sample = node_a.node_sample()?;

    // A current peer and a legacy peer each receive the record in their own revision.
    for version in [ProtocolVersion::CURRENT, ProtocolVersion::LEGACY] {
        let wire = encode(Some(&sample), version);
        let received = decode(&wire[..], version)?;
        println!(
            "revision {version}: {} bytes, watts={} poll_time={}",
            wire.len(),
            received.current_watts,
            received.poll_time
        );
    }

    // A node without a sample still sends a well-formed record.
    let empty = encode(None, ProtocolVersion::CURRENT);
    println!("absent sample: {} zero bytes", empty.len());

    node_a.fini()?;
    Ok(())
}
