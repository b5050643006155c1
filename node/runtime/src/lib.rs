pub mod digest;
pub mod powers;
pub mod reencrypt;

pub use digest::keccak256;
pub use powers::{CharacterPowers, DecryptingPower, DelegatingPower, PowerUpError, SigningPower};
pub use reencrypt::PreKeyMaterial;
