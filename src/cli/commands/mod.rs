use anyhow::Result;

pub mod config;
pub mod demo;

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self) -> Result<()>;
}

pub fn show_how_to_get_started() {
    println!("🔀 FeatureFlow - Reactive Feature Workflows");
    println!();
    println!("Commands:");
    println!("  ▶️  featureflow demo             # Run the sample workflow");
    println!("  ❌ featureflow demo --fail      # Watch a rejected review");
    println!("  ⚙️  featureflow config           # Show the effective configuration");
    println!();
    println!("💡 Set RUST_LOG=debug to follow every transition.");
}
