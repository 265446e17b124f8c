#[cfg(test)]
mod tests {
    use super::super::*;
    use secrecy::ExposeSecret;
    use std::io::Write;

    #[test]
    fn test_defaults_match_recommended_constants() {
        let cfg = CascadeConfig::default();
        assert_eq!(cfg.provider.kind, ProviderKind::Gemini);
        assert_eq!(cfg.chain.models.first().map(String::as_str), Some("gemini-2.5-pro"));
        assert_eq!(cfg.retry.max_retries, 3);
        assert_eq!(cfg.retry.inter_model_cooldown_ms, 2_000);
        assert_eq!(cfg.backoff.base_delay_ms, 1_000);
        assert_eq!(cfg.backoff.max_delay_ms, 30_000);
        assert_eq!(cfg.rate_limit.min_spacing_ms, 500);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let cfg = CascadeConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.chain.models.len(), 4);
        assert!(!cfg.chain.validate_on_startup);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let cfg = CascadeConfig::from_toml_str(
            r#"
            [chain]
            models = ["gemini-2.5-flash", "gemini-2.0-flash-lite"]
            validate_on_startup = true

            [retry]
            max_retries = 5

            [rate_limit]
            min_spacing_ms = 1000
            "#,
        )
        .unwrap();
        assert_eq!(cfg.chain.models, vec!["gemini-2.5-flash", "gemini-2.0-flash-lite"]);
        assert!(cfg.chain.validate_on_startup);
        assert_eq!(cfg.retry.max_retries, 5);
        assert_eq!(cfg.retry.inter_model_cooldown_ms, 2_000);
        assert_eq!(cfg.rate_limit.min_spacing_ms, 1_000);
        assert_eq!(cfg.backoff.multiplier, 2.0);
    }

    #[test]
    fn test_empty_chain_is_rejected() {
        let err = CascadeConfig::from_toml_str("[chain]\nmodels = []\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_invalid_backoff_is_rejected() {
        let err = CascadeConfig::from_toml_str("[backoff]\nmultiplier = 0.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = CascadeConfig::from_toml_str("[backoff]\njitter_ratio = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_retries_is_rejected() {
        let err = CascadeConfig::from_toml_str("[retry]\nmax_retries = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_openai_compatible_provider_parses() {
        let cfg = CascadeConfig::from_toml_str(
            "[provider]\nkind = \"openai_compatible\"\nbase_url = \"http://localhost:8000\"\n",
        )
        .unwrap();
        assert_eq!(cfg.provider.kind, ProviderKind::OpenAiCompatible);
        assert_eq!(cfg.provider.base_url.as_deref(), Some("http://localhost:8000"));
    }

    #[test]
    fn test_credential_prefers_file_then_env() {
        let mut cfg = CascadeConfig::default();
        let env = |name: &str| (name == "GEMINI_API_KEY").then(|| "from-env".to_string());

        assert_eq!(cfg.credential_with(env).unwrap().expose_secret(), "from-env");

        cfg.provider.api_key = Some("from-file".into());
        assert_eq!(cfg.credential_with(env).unwrap().expose_secret(), "from-file");
    }

    #[test]
    fn test_missing_credential() {
        let cfg = CascadeConfig::default();
        let err = cfg.credential_with(|_| None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential));

        let mut local = CascadeConfig::default();
        local.provider.kind = ProviderKind::OpenAiCompatible;
        assert_eq!(local.credential_with(|_| None).unwrap().expose_secret(), "");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[chain]\nmodels = [\"only-model\"]").unwrap();
        let cfg = CascadeConfig::load_from(file.path()).unwrap();
        assert_eq!(cfg.chain.models, vec!["only-model"]);
    }

    #[test]
    fn test_load_missing_file() {
        let err = CascadeConfig::load_from("/nonexistent/cascade.toml").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
