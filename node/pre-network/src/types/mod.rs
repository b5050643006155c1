pub mod arrangement;
pub mod codec;
pub mod hrac;
pub mod kfrag;
pub mod message_kit;
pub mod node_record;
pub mod revocation;
pub mod treasure_map;
pub mod work_order;

pub use arrangement::{Arrangement, ArrangementId};
pub use hrac::{Hrac, MapId};
pub use kfrag::KFragPayload;
pub use message_kit::MessageKit;
pub use node_record::{
    LEARNER_VERSION, NOT_SIGNED, NodeRecord, RestInterface, StakeVerifier,
    address_from_verifying_key,
};
pub use revocation::{Revocation, RevocationKit};
pub use treasure_map::{EncryptedTreasureMap, TreasureMap};
pub use work_order::{IndisputableEvidence, WorkOrder, WorkOrderHistory, capsule_fingerprint};
