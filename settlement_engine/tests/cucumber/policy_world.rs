use cucumber::World;
use log::*;
use settlement_engine::{
    helpers::FixedClock,
    policy::ApplicablePolicy,
    test_utils::{
        prepare_env::{create_database, random_db_path, run_migrations},
        sample_time,
    },
    CancellationPolicyApi,
    PolicyError,
    PolicyQuote,
    SqliteDatabase,
};
use tokio::time::sleep;

#[derive(Default, Debug, World)]
pub struct PolicyWorld {
    pub system: Option<PolicySystem>,
    pub last_result: Option<Result<Vec<ApplicablePolicy>, PolicyError>>,
    pub last_quotes: Vec<PolicyQuote>,
}

#[derive(Debug)]
pub struct PolicySystem {
    pub db_path: String,
    pub db: SqliteDatabase,
    pub clock: FixedClock,
    pub api: CancellationPolicyApi<SqliteDatabase>,
}

impl PolicyWorld {
    pub fn system(&self) -> &PolicySystem {
        self.system.as_ref().expect("PolicySystem not initialised")
    }

    pub fn api(&self) -> &CancellationPolicyApi<SqliteDatabase> {
        &self.system().api
    }

    pub fn applicable_keys(&self) -> Vec<String> {
        match &self.last_result {
            Some(Ok(policies)) => policies.iter().map(|p| p.policy.key.clone()).collect(),
            Some(Err(e)) => panic!("The last policy request failed: {e}"),
            None => panic!("No policy request has been made"),
        }
    }
}

impl PolicySystem {
    pub async fn new() -> Self {
        let url = prepare_test_env().await;
        let db = SqliteDatabase::new_with_url(&url, 1).await.expect("Error creating connection to database");
        debug!("Created database: {url}");
        sleep(std::time::Duration::from_millis(50)).await;
        let clock = FixedClock::new(sample_time());
        let api = CancellationPolicyApi::new(db.clone(), clock.shared());
        Self { db_path: url, db, clock, api }
    }
}

pub async fn prepare_test_env() -> String {
    let path = random_db_path();
    create_database(&path).await;
    run_migrations(&path).await;
    path
}
