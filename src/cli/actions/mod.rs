use secrecy::SecretString;

pub mod server;

/// Actions the CLI can dispatch to.
#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: String,
        base_url: String,
        frontend_origin: String,
        dev: bool,
        admin_email: Option<String>,
        admin_password: Option<SecretString>,
        mail_api_user: Option<String>,
        mail_api_key: Option<SecretString>,
        mail_from: Option<String>,
    },
}
