// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Proximity Exchange Module
//!
//! Discovery, pairing and encrypted artifact exchange between two nearby
//! devices over a radio attribute server.

pub mod artifact;
pub mod coordinator;
pub mod dual_role;
pub mod error;
pub mod events;
pub mod message;
pub mod mock_radio;
pub mod pairing;
pub mod radio;
pub mod registry;
pub mod responder;
pub mod schema;

pub use artifact::{
    ArtifactCodec, ArtifactSealer, ArtifactSource, ExchangeArtifact, JsonArtifactCodec,
    ReceivedArtifact, MAX_GRID_SIZE, MAX_TITLE_CHARS,
};
pub use coordinator::ConnectionCoordinator;
pub use dual_role::DualRoleOrchestrator;
pub use error::{ExchangeError, ExchangeResult};
pub use events::{ExchangeFailure, PairingPrompt, EVENT_CHANNEL_CAPACITY};
pub use message::{
    is_valid_code, PairingConfirmation, PairingMessage, PairingMethod, PairingRequest,
};
pub use mock_radio::{MockLink, MockRadio, MockRadioMedium};
pub use pairing::{
    generate_pairing_code, ExchangeRole, PairingProtocol, PairingSession, PairingState,
    PairingUpdate,
};
pub use radio::{
    Advertisement, AdvertisingParams, CentralRadio, ConnectionState, DiscoveredPeer, PeerLink,
    PeripheralEvent, PeripheralRadio,
};
pub use registry::PairedPeerRegistry;
pub use responder::ResponderRoleAdapter;
pub use schema::{
    decode_advertised_name, encode_advertised_name, ADVERTISED_NAME_PREFIX, ARTIFACT_READ_UUID,
    ARTIFACT_WRITE_UUID, EXCHANGE_SERVICE_UUID, MAX_ATTRIBUTE_VALUE_LEN, MAX_DISPLAY_NAME_CHARS,
    PAIRING_CODE_LENGTH, PAIRING_CODE_VALIDITY, PAIRING_UUID, REQUIRED_ATTRIBUTES,
};
