use rocket::fairing::{Fairing, Info, Kind};
use rocket::{Build, Rocket};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::migrate::Migrator;
use std::path::Path;
use std::str::FromStr;

// macro to decode some type from SQL text
#[macro_export]
macro_rules! impl_sqlx_text_type_and_decode {
    ($type:ident) => {
        impl<DB: sqlx::Database> sqlx::Type<DB> for $type
        where str: sqlx::Type<DB>
        {
            fn type_info() -> <DB as sqlx::Database>::TypeInfo {
                // TEXT columns only
                <&str as sqlx::Type<DB>>::type_info()
            }
        }

        impl<'r, DB: sqlx::Database> sqlx::Decode<'r, DB> for $type
        where &'r str: sqlx::Decode<'r, DB>
        {
            fn decode(value: <DB as sqlx::Database>::ValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
                let value = <&str as sqlx::Decode<DB>>::decode(value)?;
                Ok(value.parse::<$type>()?)
            }
        }
    };
}

// macro to decode some type from SQL JSON text
#[macro_export]
macro_rules! impl_sqlx_json_text_type_and_decode {
    ($type:ident) => {
        impl<DB: sqlx::Database> sqlx::Type<DB> for $type
        where str: sqlx::Type<DB>
        {
            fn type_info() -> <DB as sqlx::Database>::TypeInfo {
                // TEXT columns only
                <&str as sqlx::Type<DB>>::type_info()
            }
        }

        impl<'r, DB: sqlx::Database> sqlx::Decode<'r, DB> for $type
        where &'r str: sqlx::Decode<'r, DB>
        {
            fn decode(value: <DB as sqlx::Database>::ValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
                let value = <&str as sqlx::Decode<DB>>::decode(value)?;
                Ok(serde_json::from_str::<$type>(value)?)
            }
        }
    };
}

static MIGRATOR: Migrator = sqlx::migrate!("db/migrations");

pub struct DbPool(pub SqlitePool);

pub struct DbPoolFairing();
#[rocket::async_trait]
impl Fairing for DbPoolFairing {
    fn info(&self) -> Info {
        Info {
            name: "SQLite Database Pool with Migrations",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let database_url = if cfg!(test) {
            "sqlite::memory:".to_string()
        } else {
            let Ok(database_url) = rocket.figment().extract_inner::<String>("database_url") else {
                error!("Config key 'database_url' is missing");
                return Err(rocket);
            };
            if database_url.starts_with("sqlite://") {
                let db_path = database_url.trim_start_matches("sqlite://");
                if !Path::new(db_path).exists() {
                    info!("Creating database file: {db_path}");
                    if let Err(err) = std::fs::File::create(db_path) {
                        error!("Cannot create database file {db_path}: {err}");
                        return Err(rocket);
                    }
                }
            }
            database_url
        };

        info!("Opening database: {database_url}");
        let opts = match SqliteConnectOptions::from_str(&database_url) {
            Ok(opts) => opts.journal_mode(SqliteJournalMode::Wal),
            Err(err) => {
                error!("Invalid database url {database_url}: {err}");
                return Err(rocket);
            }
        };
        // every in-memory connection is a separate database, keep exactly one alive
        let pool_opts = if cfg!(test) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = match pool_opts.connect_with(opts).await {
            Ok(pool) => pool,
            Err(err) => {
                error!("Database connection error: {:?}", err);
                return Err(rocket);
            }
        };

        match MIGRATOR.run(&pool).await {
            Ok(_) => info!("Migrations applied successfully!"),
            Err(err) => {
                error!("Migration error: {:?}", err);
                return Err(rocket);
            }
        };

        Ok(rocket.manage(DbPool(pool)))
    }
}
