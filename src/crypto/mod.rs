//! Crypto provider selection for rustls
//!
//! The provider is passed explicitly to every `ClientConfig` instead of being
//! installed process-wide, so several engines (or the host app) can coexist.

use rustls::crypto::CryptoProvider;

pub mod tls;

pub use tls::TlsConfig;

#[cfg(not(any(feature = "ring-crypto", feature = "aws-lc-crypto")))]
compile_error!("enable either the `ring-crypto` or the `aws-lc-crypto` feature");

// If both features are enabled, prefer ring (for CI --all-features)
#[cfg(feature = "ring-crypto")]
pub(crate) fn provider() -> CryptoProvider {
    rustls::crypto::ring::default_provider()
}

#[cfg(all(feature = "aws-lc-crypto", not(feature = "ring-crypto")))]
pub(crate) fn provider() -> CryptoProvider {
    rustls::crypto::aws_lc_rs::default_provider()
}
