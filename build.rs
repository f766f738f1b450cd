//! Build script for vpnfw
//!
//! Embeds build-time information (git commit, dirty status, build timestamp)
//! shown by `vpnfw version`.

fn main() {
    // Re-run build if the nft override changes between builds of the test suite
    println!("cargo:rerun-if-env-changed=VPNFW_NFT_COMMAND");

    // Embed git commit, build time, and dirty status
    shadow_rs::ShadowBuilder::builder()
        .build()
        .expect("Failed to generate build info");
}
