mod cli;

use std::time::Duration;

use clap::Parser;
use eyre::{bail, eyre, WrapErr};

use sollink_core::error::{CoreError, SubscriptionError};
use sollink_core::rpc::{HttpOptions, LedgerRpc, RpcClient};
use sollink_core::stream::{Notification, StreamClient, StreamConfig};
use sollink_core::types::{Commitment, PublicKey, Signature};
use sollink_core::{derive, Keypair};

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    match &args.command {
        Command::Balance { address } => {
            let rpc = connect_rpc(&args)?;
            let lamports = rpc
                .get_balance(address, Some(args.commitment))
                .await
                .map_err(|err| rpc_error(&args.rpc_url, &err))?;
            println!("{lamports}");
        }
        Command::Account { address, data } => {
            let rpc = connect_rpc(&args)?;
            let account = rpc
                .get_account_info(address, Some(args.commitment))
                .await
                .map_err(|err| rpc_error(&args.rpc_url, &err))?;
            println!("owner:      {}", account.owner);
            println!("lamports:   {}", account.lamports);
            println!("executable: {}", account.executable);
            println!("rent epoch: {}", account.rent_epoch);
            if *data {
                println!("data:       {}", hex_encode(&account.data));
            } else {
                println!("data:       {} bytes", account.data.len());
            }
        }
        Command::Derive {
            program,
            seeds,
            base,
        } => {
            let (address, bump) = derive_address(program, seeds, base.as_ref())?;
            match bump {
                Some(bump) => println!("{address} (bump {bump})"),
                None => println!("{address}"),
            }
        }
        Command::Airdrop {
            address,
            lamports,
            confirm,
            confirm_timeout_secs,
        } => {
            let rpc = connect_rpc(&args)?;
            // Connect first so a missing stream fails before lamports are requested.
            let stream = if *confirm {
                Some(connect_stream(&args).await?)
            } else {
                None
            };

            let signature = rpc
                .request_airdrop(address, *lamports, Some(args.commitment))
                .await
                .map_err(|err| rpc_error(&args.rpc_url, &err))?;
            tracing::info!(%signature, %address, lamports, "airdrop requested");
            println!("{signature}");

            if let Some(stream) = stream {
                let timeout = Duration::from_secs(*confirm_timeout_secs);
                let outcome =
                    wait_for_signature(&stream, signature, args.commitment, timeout).await;
                stream.close().await;
                outcome?;
                println!("confirmed at {}", args.commitment);
            }
        }
        Command::WatchSlots { count } => {
            let stream = connect_stream(&args).await?;
            let outcome = watch_slots(&stream, *count).await;
            stream.close().await;
            outcome?;
        }
        Command::AddressFromKeypair { path } => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read key file {}", path.display()))?;
            let keypair = Keypair::from_keygen_json(&text).context("decode key file")?;
            println!("{}", keypair.public_key());
        }
    }

    Ok(())
}

fn connect_rpc(args: &Cli) -> eyre::Result<RpcClient> {
    let options = HttpOptions {
        request_timeout: Duration::from_secs(args.timeout_secs),
        requests_per_second: args.requests_per_second,
        ..HttpOptions::default()
    };
    RpcClient::with_options(&args.rpc_url, options, tracing::info_span!("rpc"))
        .context("configure RPC client")
}

async fn connect_stream(args: &Cli) -> eyre::Result<StreamClient> {
    let config = StreamConfig::default();
    let handshake = config.handshake_timeout + config.request_timeout;
    let stream = StreamClient::new(&args.ws_url, config, tracing::info_span!("stream"))
        .context("configure stream client")?;
    let generation = stream
        .wait_connected(handshake)
        .await
        .wrap_err_with(|| format!("could not connect to subscription endpoint `{}`", args.ws_url))?;
    tracing::info!(stream.generation = generation, url = %args.ws_url, "stream connected");
    Ok(stream)
}

fn derive_address(
    program: &PublicKey,
    seeds: &[String],
    base: Option<&PublicKey>,
) -> eyre::Result<(PublicKey, Option<u8>)> {
    if let Some(base) = base {
        let [seed] = seeds else {
            bail!("--base takes exactly one --seed, got {}", seeds.len());
        };
        let address =
            derive::create_with_seed(base, seed, program).context("derive seeded address")?;
        return Ok((address, None));
    }

    let seed_bytes: Vec<&[u8]> = seeds.iter().map(|s| s.as_bytes()).collect();
    let (address, bump) =
        derive::find_program_address(&seed_bytes, program).context("derive program address")?;
    Ok((address, Some(bump)))
}

async fn wait_for_signature(
    stream: &StreamClient,
    signature: Signature,
    commitment: Commitment,
    timeout: Duration,
) -> eyre::Result<()> {
    let mut subscription = stream
        .signature_subscribe(signature, Some(commitment))
        .await
        .context("subscribe to airdrop signature")?;

    let notification = match subscription.recv(tokio::time::sleep(timeout)).await {
        Ok(notification) => notification,
        Err(CoreError::Cancelled) => {
            bail!("airdrop {signature} not confirmed within {}s", timeout.as_secs())
        }
        Err(err) => return Err(err).context("wait for airdrop confirmation"),
    };

    match notification {
        Notification::Signature(status) => match status.err {
            None => Ok(()),
            Some(err) => Err(eyre!("airdrop {signature} failed in slot {}: {err}", status.slot)),
        },
        other => Err(eyre!("unexpected {} notification", other.kind())),
    }
}

async fn watch_slots(stream: &StreamClient, count: Option<u64>) -> eyre::Result<()> {
    let mut seen = 0u64;
    let mut subscription = stream.slot_subscribe().await.context("subscribe to slots")?;

    while count.map_or(true, |limit| seen < limit) {
        match subscription.recv(tokio::signal::ctrl_c()).await {
            Ok(Notification::Slot(slot)) => {
                seen += 1;
                println!("slot {} parent {} root {}", slot.slot, slot.parent, slot.root);
            }
            Ok(other) => tracing::warn!(kind = %other.kind(), "ignoring unexpected notification"),
            Err(CoreError::Cancelled) => break,
            Err(CoreError::Subscription(SubscriptionError::ConnectionLost { generation })) => {
                tracing::warn!(stream.generation = generation, "connection lost; re-subscribing");
                let timeout = StreamConfig::default().backoff.max * 2;
                stream
                    .wait_connected(timeout)
                    .await
                    .context("reconnect to subscription endpoint")?;
                subscription = stream.slot_subscribe().await.context("re-subscribe to slots")?;
            }
            Err(err) => return Err(err).context("slot subscription ended"),
        }
    }

    subscription.unsubscribe().await;
    Ok(())
}

fn rpc_error(rpc_url: &str, err: &CoreError) -> eyre::Report {
    let message = format_rpc_error(rpc_url, &err.to_string());
    eyre!(message).wrap_err("RPC request failed")
}

fn format_rpc_error(rpc_url: &str, source_error: &str) -> String {
    let mut lines = vec![
        format!("request to RPC endpoint `{rpc_url}` failed"),
        format!("RPC error: {source_error}"),
    ];

    if source_error.contains("dns error") || source_error.contains("Could not resolve host") {
        lines.push(
            "hint: hostname resolution failed; verify the endpoint hostname and your DNS/network"
                .into(),
        );
    } else if source_error.contains("tls") || source_error.contains("certificate") {
        lines.push(
            "hint: TLS handshake failed; verify certificate trust and that the endpoint uses HTTPS"
                .into(),
        );
    } else if source_error.contains("HTTP status 429") {
        lines.push("hint: the node is rate limiting; lower --requests-per-second".into());
    } else if source_error.contains("HTTP status 401") || source_error.contains("HTTP status 403") {
        lines.push("hint: authentication failed; verify the API key in the endpoint URL".into());
    } else if source_error.contains("error sending request for url") {
        lines.push(
            "hint: request could not be sent; verify URL format, network access and endpoint \
             reachability"
                .into(),
        );
    }

    lines.join("\n")
}

fn hex_encode(bytes: impl AsRef<[u8]>) -> String {
    bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
}
