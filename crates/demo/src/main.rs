use clap::Parser;
use tokio::task::LocalSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vekit_chain_mock::{scenarios::tokens, DemoScenario};
use vekit_client::{
    signer_for_connection, transfer_clause, AuthorizationMode, ConnectionKind,
    KeyValuePreferenceStore, KitConfig, LocalKeyProvider, MockChainClient, MockDelegatorTransport,
    SendOptions, TransactionEvent, TransactionManager, TransactionWrapper, TransferRequest,
};
use vekit_types::{GasToken, InMemoryKeyValueStore};

#[derive(Parser, Debug)]
#[command(
    name = "vekit-demo",
    about = "Send a fee-delegated token transfer from a smart account against in-memory mocks"
)]
struct Args {
    /// Token to transfer.
    #[arg(long, env = "VEKIT_TOKEN", default_value = "B3TR")]
    token: GasToken,

    /// Whole tokens to transfer.
    #[arg(long, env = "VEKIT_AMOUNT", default_value = "1")]
    amount: u64,

    /// Pay gas with this token instead of the preference-ordered choice.
    #[arg(long, env = "VEKIT_GAS_TOKEN")]
    gas_token: Option<GasToken>,

    /// Smart-account implementation version (3 and above sign batches).
    #[arg(long, default_value = "3")]
    account_version: u64,

    /// Start with an account that still needs to be created.
    #[arg(long)]
    undeployed: bool,

    /// Pay gas from the owner instead of the sponsor.
    #[arg(long)]
    direct: bool,

    /// Send from the owner's own address instead of the smart account; implies --direct.
    #[arg(long)]
    eoa: bool,

    /// Kit configuration as JSON; defaults to testnet.
    #[arg(long, env = "VEKIT_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Safety margin added to gas estimates, as a ratio.
    #[arg(long, env = "VEKIT_GAS_PADDING")]
    gas_padding: Option<f64>,

    /// Timeout for chain and sponsor requests.
    #[arg(long, env = "VEKIT_REQUEST_TIMEOUT_MS")]
    request_timeout_ms: Option<u64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    LocalSet::new().run_until(run(args)).await
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => KitConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => KitConfig::default(),
    };
    if let Some(padding) = args.gas_padding {
        config.gas_padding = padding;
    }
    if let Some(timeout) = args.request_timeout_ms {
        config.request_timeout_ms = timeout;
    }
    let scenario = DemoScenario::new(args.account_version, !args.undeployed);
    let accounts = scenario.accounts;
    config.account_factory = scenario.chain.factory;

    let chain = MockChainClient::new(scenario.chain);
    let sponsor = MockDelegatorTransport::new(scenario.sponsor);
    let signer = signer_for_connection(
        ConnectionKind::EmbeddedWallet,
        LocalKeyProvider::from_key(&accounts.owner_key)?,
    );
    let registry = config.tokens;
    let manager = TransactionManager::new(
        chain.clone(),
        sponsor,
        signer,
        Box::new(KeyValuePreferenceStore::new(InMemoryKeyValueStore::new())),
        config,
    )?;
    manager.connect(accounts.owner);

    let preview =
        transfer_clause(&registry, args.token, accounts.recipient, tokens(args.amount))?;
    let costs = manager
        .gas_token_selector()
        .estimate_gas_costs(&[preview], accounts.smart_account)
        .await;
    for cost in &costs {
        info!(
            token = %cost.token,
            cost = %cost.cost,
            balance = %cost.balance,
            available = cost.available,
            "gas token quote"
        );
    }

    let mut events = manager.subscribe();
    let wrapper = TransactionWrapper::new(manager.clone(), accounts.owner, registry);
    let authorization = if args.eoa {
        AuthorizationMode::DirectSignature
    } else {
        AuthorizationMode::SmartAccount
    };
    let options = SendOptions {
        delegated: !(args.direct || args.eoa),
        authorization,
        gas_token: args.gas_token,
        ..SendOptions::default()
    };
    info!(
        token = %args.token,
        amount = args.amount,
        to = %accounts.recipient,
        smart_account = %accounts.smart_account,
        "submitting transfer"
    );
    let tracked = wrapper.transfer(
        TransferRequest {
            token: args.token,
            to: accounts.recipient,
            amount: tokens(args.amount),
        },
        options,
    )?;

    let outcome = manager.wait_for_settlement(tracked.id).await?;
    while let Ok(event) = events.try_recv() {
        if let TransactionEvent::StatusChange { status, tx_id, .. } = event {
            info!(status = ?status, tx_id = ?tx_id, "status");
        }
    }

    match &outcome.error {
        None => info!(
            tx_id = ?outcome.tx_id,
            gas_token = ?outcome.delegation_token,
            gas_payer = ?outcome.receipt.as_ref().map(|r| r.gas_payer),
            "transfer confirmed"
        ),
        Some(err) => warn!(category = %err.category, error = %err.raw, "transfer failed"),
    }
    let submitted = chain.with_chain(|chain| chain.submitted.len())?;
    info!(submitted, "done");
    manager.disconnect();
    Ok(())
}
