use std::net::{IpAddr, Ipv4Addr};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Maximum number of concurrent lobbies
    pub max_lobbies: usize,
    /// Default lobby capacity when the client does not specify one
    pub default_max_players: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 3030,
            max_lobbies: 100,
            default_max_players: 4,
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("BIND_ADDRESS") {
            if let Ok(parsed) = addr.parse() {
                config.bind_address = parsed;
            } else {
                tracing::warn!("Invalid BIND_ADDRESS '{}', using default", addr);
            }
        }

        if let Ok(port) = std::env::var("PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                if parsed > 0 {
                    config.port = parsed;
                } else {
                    tracing::warn!("PORT must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid PORT '{}', using default", port);
            }
        }

        if let Ok(max_lobbies) = std::env::var("MAX_LOBBIES") {
            if let Ok(parsed) = max_lobbies.parse::<usize>() {
                if parsed > 0 && parsed <= 10000 {
                    config.max_lobbies = parsed;
                } else {
                    tracing::warn!("MAX_LOBBIES must be 1-10000, using default");
                }
            } else {
                tracing::warn!("Invalid MAX_LOBBIES '{}', using default", max_lobbies);
            }
        }

        if let Ok(max_players) = std::env::var("DEFAULT_MAX_PLAYERS") {
            if let Ok(parsed) = max_players.parse::<usize>() {
                if parsed > 0 && parsed <= 64 {
                    config.default_max_players = parsed;
                } else {
                    tracing::warn!("DEFAULT_MAX_PLAYERS must be 1-64, using default");
                }
            } else {
                tracing::warn!("Invalid DEFAULT_MAX_PLAYERS '{}', using default", max_players);
            }
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0".to_string());
        }
        if self.max_lobbies == 0 {
            return Err("max_lobbies must be at least 1".to_string());
        }
        if self.default_max_players == 0 {
            return Err("default_max_players must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3030);
        assert_eq!(config.max_lobbies, 100);
        assert_eq!(config.default_max_players, 4);
    }

    #[test]
    fn test_default_validates() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_lobbies() {
        let config = ServerConfig {
            max_lobbies: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
