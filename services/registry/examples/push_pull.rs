//! Push a layer and a manifest, then pull them back.
//!
//! Run with: cargo run -p registry --example push_pull [config.toml]
//!
//! Without a config file the registry uses in-memory storage.

use registry::{Digest, Manifest, RegistryConfig, SignedManifest};
use storage::DriverRegistry;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = r#"
[storage]
driver = "inmemory"
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => std::fs::read_to_string(path)?,
        None => DEFAULT_CONFIG.to_owned(),
    };
    let config: RegistryConfig = toml_edit::de::from_str(&config)?;

    let drivers = DriverRegistry::with_defaults();
    let registry = config.build(&drivers)?;
    tracing::info!(driver = registry.storage().name(), root = %registry.root(), "Registry ready");

    let repository = registry.repository("library/hello")?;

    let layer = b"hello from a layer";
    let mut upload = repository.layers().upload().await?;
    let (head, tail) = layer.split_at(6);
    upload.write(0, head).await?;
    upload.write(head.len() as u64, tail).await?;
    let descriptor = upload.finish(&Digest::sha256(layer)).await?;
    tracing::info!(digest = %descriptor.digest, size = descriptor.size, "Pushed layer");

    let manifest = Manifest::new("library/hello", "latest", vec![descriptor.digest.clone()]);
    let signed = SignedManifest::parse(manifest.sign_with("none", |input| input.to_vec())?)?;
    let digest = repository.manifests().put("latest", &signed).await?;
    tracing::info!(%digest, "Pushed manifest");

    let pulled = repository.manifests().get("latest").await?;
    for layer in pulled.manifest().layers() {
        let mut reader = repository.layers().fetch(layer).await?;
        let content = reader.read_to_end().await?;
        tracing::info!(%layer, "Pulled {:?}", String::from_utf8_lossy(&content));
    }

    for name in registry.catalog().await? {
        let tags = registry.repository(name.as_str())?.manifests().tags().await?;
        println!("{name}: {}", tags.join(", "));
    }

    Ok(())
}
