use voxnet::{PeerId, PlayerId};

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    PlayerJoined {
        peer: PeerId,
        player_id: PlayerId,
    },
    PlayerLeft {
        peer: PeerId,
        player_id: PlayerId,
    },
    ConnectionRefused {
        peer: PeerId,
        reason: &'static str,
    },
    MessageDropped {
        peer: PeerId,
        reason: String,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn log(&self) {
        match self {
            ServerEvent::PlayerJoined { peer, player_id } => {
                log::info!("peer {} joined as player {}", peer, player_id);
            }
            ServerEvent::PlayerLeft { peer, player_id } => {
                log::info!("player {} (peer {}) left", player_id, peer);
            }
            ServerEvent::ConnectionRefused { peer, reason } => {
                log::warn!("refused peer {}: {}", peer, reason);
            }
            ServerEvent::MessageDropped { peer, reason } => {
                log::warn!("dropped message from peer {}: {}", peer, reason);
            }
            ServerEvent::Error { message } => {
                log::error!("{}", message);
            }
        }
    }
}
