// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Simulate Command
//!
//! Two in-memory devices run dual mode against each other. Every pairing
//! prompt is answered automatically: numeric codes are accepted, passkeys
//! are copied from the code the peer displays.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::Mutex;
use tracing::{info, warn};

use pixeldrop_core::exchange::{MockRadioMedium, PairingPrompt};
use pixeldrop_core::{
    DualRoleOrchestrator, ExchangeArtifact, ExchangeConfig, ExchangeRole, NoopNotificationSink,
    PairingMethod, ReceivedArtifact, StaticSettings,
};

const FIRST_ADDRESS: &str = "AA:00:00:00:00:01";
const SECOND_ADDRESS: &str = "BB:00:00:00:00:02";
const WRONG_PASSKEY: &str = "000000";
const PASSKEY_POLL: Duration = Duration::from_millis(50);
const PASSKEY_POLLS: u32 = 40;

pub struct SimulateOptions {
    pub title: String,
    pub peer_title: String,
    pub wrong_passkey: bool,
    pub wait: Duration,
}

/// Codes currently shown on a responder screen, keyed by that device.
type DisplayedCodes = Arc<Mutex<HashMap<String, String>>>;

pub async fn run(config: ExchangeConfig, options: SimulateOptions) -> Result<()> {
    let medium = MockRadioMedium::new();
    let displayed = DisplayedCodes::default();

    let first = device(&medium, FIRST_ADDRESS, &config, "first")?;
    let second = device(&medium, SECOND_ADDRESS, &config, "second")?;

    let answers = [
        answer_prompts(&first, FIRST_ADDRESS, displayed.clone(), options.wrong_passkey),
        answer_prompts(&second, SECOND_ADDRESS, displayed.clone(), options.wrong_passkey),
    ];
    let mut first_received = first.subscribe_received();
    let mut second_received = second.subscribe_received();

    first
        .start_dual_mode("First", drawing(&options.title)?)
        .await?;
    second
        .start_dual_mode("Second", drawing(&options.peer_title)?)
        .await?;
    info!(method = %config.pairing_method, "Both devices in dual mode");

    let outcome = tokio::time::timeout(options.wait, async {
        let a = first_received.recv().await?;
        let b = second_received.recv().await?;
        Ok::<_, tokio::sync::broadcast::error::RecvError>((a, b))
    })
    .await;

    first.stop_dual_mode().await?;
    second.stop_dual_mode().await?;
    for task in answers {
        task.abort();
    }

    match outcome {
        Ok(Ok((a, b))) => {
            print_received("first", &a);
            print_received("second", &b);
            Ok(())
        }
        Ok(Err(err)) => bail!("event stream closed: {err}"),
        Err(_) => bail!("no exchange completed within {:?}", options.wait),
    }
}

fn device(
    medium: &MockRadioMedium,
    address: &str,
    config: &ExchangeConfig,
    name: &str,
) -> Result<DualRoleOrchestrator> {
    let radio = Arc::new(medium.radio(address));
    let mut config = config.clone();
    config.device_id = format!("{}-{name}", config.device_id);
    Ok(DualRoleOrchestrator::new(
        config,
        radio.clone(),
        radio,
        Arc::new(StaticSettings::default()),
        Arc::new(NoopNotificationSink),
    )?)
}

fn drawing(title: &str) -> Result<ExchangeArtifact> {
    let pixels = (0..16u32).map(|i| 0x00ff_0000 | (i * 0x0f0f)).collect();
    Ok(ExchangeArtifact::new(title, 4, pixels)?)
}

fn answer_prompts(
    orchestrator: &DualRoleOrchestrator,
    address: &str,
    displayed: DisplayedCodes,
    wrong_passkey: bool,
) -> tokio::task::JoinHandle<()> {
    let orchestrator = orchestrator.clone();
    let address = address.to_string();
    let mut prompts = orchestrator.subscribe_prompts();

    tokio::spawn(async move {
        while let Ok(prompt) = prompts.recv().await {
            println!(
                "[{address}] {:?} prompt for {}: code {}",
                prompt.role, prompt.peer_id, prompt.code
            );
            let result = match (prompt.method, prompt.role) {
                (PairingMethod::NumericComparison, _) => {
                    orchestrator.confirm_pairing(&prompt, true).await
                }
                (PairingMethod::PasskeyEntry, ExchangeRole::Responder) => {
                    displayed
                        .lock()
                        .await
                        .insert(address.clone(), prompt.code.clone());
                    continue;
                }
                (PairingMethod::PasskeyEntry, ExchangeRole::Initiator) => {
                    let entered = if wrong_passkey {
                        WRONG_PASSKEY.to_string()
                    } else {
                        match read_displayed(&displayed, &prompt).await {
                            Some(code) => code,
                            None => {
                                warn!(peer_id = %prompt.peer_id, "Peer never displayed a code");
                                continue;
                            }
                        }
                    };
                    orchestrator.submit_passkey(&prompt, &entered).await
                }
            };
            if let Err(err) = result {
                warn!(peer_id = %prompt.peer_id, error = %err, "Pairing answer not accepted");
            }
        }
    })
}

async fn read_displayed(displayed: &DisplayedCodes, prompt: &PairingPrompt) -> Option<String> {
    for _ in 0..PASSKEY_POLLS {
        if let Some(code) = displayed.lock().await.get(&prompt.peer_id) {
            return Some(code.clone());
        }
        tokio::time::sleep(PASSKEY_POLL).await;
    }
    None
}

fn print_received(device: &str, received: &ReceivedArtifact) {
    println!(
        "[{device}] received \"{}\" from {} via {:?} ({})",
        received.artifact.title(),
        received.peer_id,
        received.via,
        received.source.as_str()
    );
}
