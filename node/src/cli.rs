use {
    crate::config::NodeConfig,
    clap::{crate_description, crate_name, crate_version, App, Arg, ArgMatches},
    std::{net::SocketAddr, path::PathBuf},
};

pub const DEFAULT_CONFIG_PATH: &str = "tessera.toml";
pub const DEFAULT_LOG_FILTER: &str = "tessera=info";

fn is_socket_addr(value: String) -> Result<(), String> {
    value
        .parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|err| format!("{value}: {err}"))
}

pub fn app<'a, 'b>() -> App<'a, 'b> {
    App::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .takes_value(true)
                .default_value(DEFAULT_CONFIG_PATH)
                .help("TOML configuration file; defaults are used if it does not exist"),
        )
        .arg(
            Arg::with_name("network")
                .long("network")
                .value_name("NAME")
                .takes_value(true)
                .possible_values(&["mainnet", "testnet", "devnet"])
                .help("Network to join, overriding the config file"),
        )
        .arg(
            Arg::with_name("listen")
                .long("listen")
                .value_name("HOST:PORT")
                .takes_value(true)
                .validator(is_socket_addr)
                .help("Address to accept peer connections on"),
        )
        .arg(
            Arg::with_name("advertised_ip")
                .long("advertised-ip")
                .value_name("IP")
                .takes_value(true)
                .help("IP address announced to peers in the handshake"),
        )
        .arg(
            Arg::with_name("seed_node")
                .long("seed-node")
                .value_name("HOST:PORT")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .validator(is_socket_addr)
                .help("Node to dial at startup; may be repeated"),
        )
        .arg(
            Arg::with_name("log")
                .long("log")
                .value_name("FILTER")
                .takes_value(true)
                .help("env_logger filter; overrides RUST_LOG when given"),
        )
}

/// Command-line arguments, applied on top of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub config_path: PathBuf,
    /// Explicit `--log` filter. `RUST_LOG` or [`DEFAULT_LOG_FILTER`]
    /// applies otherwise.
    pub log_filter: Option<String>,
    pub network: Option<String>,
    pub listen_addr: Option<SocketAddr>,
    pub advertised_ip: Option<String>,
    pub seed_nodes: Vec<SocketAddr>,
}

impl CliArgs {
    pub fn from_matches(matches: &ArgMatches<'_>) -> Self {
        Self {
            config_path: PathBuf::from(matches.value_of("config").unwrap_or(DEFAULT_CONFIG_PATH)),
            log_filter: matches.value_of("log").map(str::to_string),
            network: matches.value_of("network").map(str::to_string),
            listen_addr: matches.value_of("listen").and_then(|v| v.parse().ok()),
            advertised_ip: matches.value_of("advertised_ip").map(str::to_string),
            seed_nodes: matches
                .values_of("seed_node")
                .into_iter()
                .flatten()
                .filter_map(|v| v.parse().ok())
                .collect(),
        }
    }

    /// Flags win over file values; seed nodes are added to the file's list.
    pub fn apply(&self, config: &mut NodeConfig) {
        if let Some(network) = &self.network {
            config.network = Some(network.clone());
        }
        if let Some(addr) = self.listen_addr {
            config.p2p.listen_addr = Some(addr);
        }
        if let Some(ip) = &self.advertised_ip {
            config.p2p.advertised_ip = Some(ip.clone());
        }
        config.p2p.seed_nodes.extend(self.seed_nodes.iter().copied());
    }
}
