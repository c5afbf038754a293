use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

/// PKCE code verifier, see: https://datatracker.ietf.org/doc/html/rfc7636
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CodeVerifier<const LENGTH: usize> {
    code_verifier: String,
}

impl<const LENGTH: usize> CodeVerifier<LENGTH> {
    const VALID_LENGTH: () = assert!(LENGTH >= 43 && LENGTH <= 128, "Invalid code verifier length");

    pub(crate) fn generate() -> Self {
        use rand::Rng;

        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_LENGTH;

        const CHARSET: &[u8] =
            b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
        let mut rng = rand::rng();

        let code_verifier = (0..LENGTH)
            .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
            .collect::<String>();

        Self { code_verifier }
    }

    pub(crate) fn from_stored(code_verifier: String) -> Self {
        Self { code_verifier }
    }

    pub(crate) fn to_code_challenge(&self) -> CodeChallenge {
        use sha2::Digest;

        let digest = sha2::Sha256::digest(self.code_verifier.as_bytes());

        CodeChallenge {
            code_challenge: URL_SAFE_NO_PAD.encode(digest),
            code_challenge_method: CodeChallengeMethod::S256,
        }
    }

    pub(crate) fn code_verifier(&self) -> &str {
        self.code_verifier.as_str()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CodeChallengeMethod {
    S256,
}

impl CodeChallengeMethod {
    /// Spelling expected by the provider's authorize endpoint.
    pub(crate) fn as_param(&self) -> &'static str {
        match self {
            CodeChallengeMethod::S256 => "s256",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CodeChallenge {
    code_challenge: String,
    code_challenge_method: CodeChallengeMethod,
}

impl CodeChallenge {
    pub(crate) fn code_challenge(&self) -> &str {
        self.code_challenge.as_str()
    }

    pub(crate) fn code_challenge_method(&self) -> CodeChallengeMethod {
        self.code_challenge_method
    }
}
