//! Pairing agent registration

use bluer::agent::{Agent, AgentHandle, DisplayPasskey, RequestConfirmation};
use bluer::Session;
use futures::FutureExt;
use tracing::info;

use crate::config::PairingMode;
use crate::error::BleTransportError;

/// Register the default pairing agent for the session
///
/// BlueZ derives the IO capability from which callbacks are present.
pub(crate) async fn register(
    session: &Session,
    mode: PairingMode,
) -> Result<AgentHandle, BleTransportError> {
    let agent = match mode {
        PairingMode::NoInputNoOutput => Agent {
            request_default: true,
            ..Default::default()
        },
        PairingMode::Interactive => Agent {
            request_default: true,
            display_passkey: Some(Box::new(|req: DisplayPasskey| {
                async move {
                    info!(
                        "Pairing with {}: enter passkey {:06} on the host ({} digits typed)",
                        req.device, req.passkey, req.entered
                    );
                    Ok(())
                }
                .boxed()
            })),
            request_confirmation: Some(Box::new(|req: RequestConfirmation| {
                async move {
                    info!(
                        "Pairing with {}: confirming passkey {:06}",
                        req.device, req.passkey
                    );
                    Ok(())
                }
                .boxed()
            })),
            ..Default::default()
        },
    };

    let handle = session
        .register_agent(agent)
        .await
        .map_err(|e| BleTransportError::Agent(e.to_string()))?;
    info!("Registered {:?} pairing agent", mode);
    Ok(handle)
}
