use otterstax_core::connection::DriverRegistry;
#[cfg(any(feature = "mysql", feature = "postgres"))]
use otterstax_core::environments::Protocol;

/// Registry holding every driver compiled into this build.
#[must_use]
pub fn default_registry() -> DriverRegistry {
    #[allow(unused_mut)]
    let mut registry = DriverRegistry::new();

    #[cfg(feature = "mysql")]
    registry.register(Protocol::Mysql, Box::new(crate::mysql::MysqlConnector));
    #[cfg(feature = "postgres")]
    registry.register(Protocol::Postgres, Box::new(crate::postgres::PostgresConnector));

    registry
}

#[cfg(test)]
mod tests {
    use otterstax_core::environments::Protocol;

    use super::default_registry;

    #[test]
    fn compiled_features_decide_supported_protocols() {
        let registry = default_registry();
        assert_eq!(registry.supports(Protocol::Mysql), cfg!(feature = "mysql"));
        assert_eq!(
            registry.supports(Protocol::Postgres),
            cfg!(feature = "postgres")
        );
    }

    #[cfg(feature = "postgres")]
    #[test]
    fn postgres_entry_reports_its_driver() {
        let registry = default_registry();
        let connector = registry
            .connector(Protocol::Postgres)
            .expect("postgres driver registered");
        assert_eq!(connector.driver_name(), "tokio-postgres");
    }
}
