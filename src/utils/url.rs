use url::Url;

const SENSITIVE_PARAMS: &[&str] = &["username", "password", "user", "pass", "pwd", "passwd", "token"];

/// Mask credentials in a source URL before it reaches logs or reports
///
/// Handles `user:pass@host` authority credentials and the query parameters
/// EPG providers commonly use for authentication. Strings that are not URLs
/// are returned unchanged.
pub fn obfuscate_credentials(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };

    if !parsed.username().is_empty() || parsed.password().is_some() {
        let _ = parsed.set_username("****");
        let _ = parsed.set_password(Some("****"));
    }

    let has_sensitive = parsed
        .query_pairs()
        .any(|(k, _)| SENSITIVE_PARAMS.contains(&k.to_ascii_lowercase().as_str()));
    if has_sensitive {
        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| {
                let masked = SENSITIVE_PARAMS.contains(&k.to_ascii_lowercase().as_str());
                (k.into_owned(), if masked { "****".to_string() } else { v.into_owned() })
            })
            .collect();
        parsed.query_pairs_mut().clear().extend_pairs(pairs);
    }

    parsed.to_string()
}

/// Scheme of a URL, lowercased, if it parses
pub fn scheme_of(url: &str) -> Option<String> {
    Url::parse(url).ok().map(|u| u.scheme().to_ascii_lowercase())
}
