//! CLI tool for deploying and interacting with the risk engine stack.

use odra::casper_types::U256;
use odra::host::HostEnv;
use odra::prelude::{Address, Addressable};
use odra::schema::casper_contract_schema::NamedCLType;
use odra_cli::{
    deploy::DeployScript,
    scenario::{Args, Error, Scenario, ScenarioMetadata},
    CommandArg, ContractProvider, DeployedContractsContainer, DeployerExt,
    OdraCli,
};
use wraith_risk_engine::risk::access::AccessControlManager;
use wraith_risk_engine::risk::engine::RiskEngine;
use wraith_risk_engine::risk::flash_loan::FlashLoanCoordinator;
use wraith_risk_engine::risk::liquidation::LiquidationEngine;
use wraith_risk_engine::risk::oracle::PriceOracle;
use wraith_risk_engine::risk::pools::PoolManager;
use wraith_risk_engine::risk::rewards::RewardDistributor;

/// Default close factor: half of a borrow per liquidation.
const CLOSE_FACTOR: u128 = 500_000_000_000_000_000;
/// Default flash-loan fee: 9 bps.
const FLASH_FEE_RATE: u128 = 900_000_000_000_000;
/// Default protocol share of the flash fee: 30%.
const FLASH_PROTOCOL_SHARE: u128 = 300_000_000_000_000_000;

/// Deploys the access control manager with the caller as admin.
pub struct AccessControlDeployScript;

impl DeployScript for AccessControlDeployScript {
    fn deploy(
        &self,
        env: &HostEnv,
        container: &mut DeployedContractsContainer,
    ) -> Result<(), odra_cli::deploy::Error> {
        use wraith_risk_engine::risk::access::AccessControlManagerInitArgs;

        let caller = env.caller();
        let _acm = AccessControlManager::load_or_deploy(
            &env,
            AccessControlManagerInitArgs { admin: caller },
            container,
            300_000_000_000,
        )?;

        Ok(())
    }
}

/// Deploys the risk engine and its collaborators, then wires them up.
/// Requires the access control manager to be deployed first.
pub struct RiskStackDeployScript;

impl DeployScript for RiskStackDeployScript {
    fn deploy(
        &self,
        env: &HostEnv,
        container: &mut DeployedContractsContainer,
    ) -> Result<(), odra_cli::deploy::Error> {
        use wraith_risk_engine::risk::engine::RiskEngineInitArgs;
        use wraith_risk_engine::risk::flash_loan::FlashLoanCoordinatorInitArgs;
        use wraith_risk_engine::risk::liquidation::LiquidationEngineInitArgs;
        use wraith_risk_engine::risk::oracle::PriceOracleInitArgs;
        use wraith_risk_engine::risk::pools::PoolManagerInitArgs;
        use wraith_risk_engine::risk::rewards::RewardDistributorInitArgs;

        let acm = container.contract_ref::<AccessControlManager>(env)?;
        let acm_address = acm.address().clone();

        let oracle = PriceOracle::load_or_deploy(
            &env,
            PriceOracleInitArgs {
                access_control: acm_address,
                max_staleness: 3_600_000, // one hour of block time
            },
            container,
            300_000_000_000,
        )?;

        let pool_manager = PoolManager::load_or_deploy(
            &env,
            PoolManagerInitArgs {
                access_control: acm_address,
            },
            container,
            400_000_000_000,
        )?;

        let liquidation = LiquidationEngine::load_or_deploy(
            &env,
            LiquidationEngineInitArgs {
                access_control: acm_address,
                oracle: oracle.address().clone(),
                pool_manager: pool_manager.address().clone(),
                close_factor: U256::from(CLOSE_FACTOR),
            },
            container,
            400_000_000_000,
        )?;

        let rewards = RewardDistributor::load_or_deploy(
            &env,
            RewardDistributorInitArgs {
                access_control: acm_address,
            },
            container,
            400_000_000_000,
        )?;

        let engine = RiskEngine::load_or_deploy(
            &env,
            RiskEngineInitArgs {
                access_control: acm_address,
                oracle: oracle.address().clone(),
                pool_manager: pool_manager.address().clone(),
                liquidation: liquidation.address().clone(),
                rewards: rewards.address().clone(),
            },
            container,
            500_000_000_000,
        )?;
        let engine_address = engine.address().clone();

        let _flash = FlashLoanCoordinator::load_or_deploy(
            &env,
            FlashLoanCoordinatorInitArgs {
                access_control: acm_address,
                engine: engine_address,
                fee_collector: env.caller(),
                fee_rate: U256::from(FLASH_FEE_RATE),
                protocol_fee_share: U256::from(FLASH_PROTOCOL_SHARE),
            },
            container,
            400_000_000_000,
        )?;

        // point the collaborators back at the engine
        env.set_gas(300_000_000_000);
        let mut pool_manager = container.contract_ref::<PoolManager>(env)?;
        pool_manager.set_engine(engine_address);
        let mut liquidation = container.contract_ref::<LiquidationEngine>(env)?;
        liquidation.set_engine(engine_address);
        let mut rewards = container.contract_ref::<RewardDistributor>(env)?;
        rewards.set_engine(engine_address);

        Ok(())
    }
}

/// Scenario to post a price for a market's underlying.
pub struct SetPriceScenario;

impl Scenario for SetPriceScenario {
    fn args(&self) -> Vec<CommandArg> {
        vec![
            CommandArg::new("market", "Address of the market", NamedCLType::Key),
            CommandArg::new(
                "price",
                "Price of one underlying unit, 1e18 scale",
                NamedCLType::U256,
            ),
        ]
    }

    fn run(
        &self,
        env: &HostEnv,
        container: &DeployedContractsContainer,
        args: Args,
    ) -> Result<(), Error> {
        let mut oracle = container.contract_ref::<PriceOracle>(env)?;
        let market = args.get_single::<Address>("market")?;
        let price = args.get_single::<U256>("price")?;

        env.set_gas(300_000_000_000);
        oracle.try_set_price(market, price)?;

        println!("Price posted successfully!");
        Ok(())
    }
}

impl ScenarioMetadata for SetPriceScenario {
    const NAME: &'static str = "set-price";
    const DESCRIPTION: &'static str = "Posts a price for a market's underlying";
}

/// Main function to run the CLI tool.
pub fn main() {
    OdraCli::new()
        .about("CLI tool for the Wraith risk engine contracts")
        // Deploy scripts
        .deploy(AccessControlDeployScript)
        .deploy(RiskStackDeployScript)
        // Contract references
        .contract::<AccessControlManager>()
        .contract::<PriceOracle>()
        .contract::<PoolManager>()
        .contract::<LiquidationEngine>()
        .contract::<RewardDistributor>()
        .contract::<RiskEngine>()
        .contract::<FlashLoanCoordinator>()
        // Scenarios
        .scenario(SetPriceScenario)
        .build()
        .run();
}
