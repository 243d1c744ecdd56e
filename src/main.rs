use clap::Parser;
use openssl::pkey::PKey;
use snprecovery::attestation::{AttestationEvidence, AttestationVerifier, HostData};
use snprecovery::config::Config;
use snprecovery::envelope::{unwrap_response, WrappedResponse};
use snprecovery::store::JoinPolicy;
use std::error::Error;
use std::fs;

#[derive(Parser)]
enum SnpRecoveryCli {
    Verify(VerifyArgs),
    CheckPolicy(CheckPolicyArgs),
    Unwrap(UnwrapArgs),
}

#[derive(Debug, clap::Args)]
#[command(author, version, long_about = None,
    about = "Verify the supplied SEV-SNP attestation against the pinned AMD \
    roots and UVM endorsement issuer, and print its claims")]
struct VerifyArgs {
    #[arg(short, long, default_value = "attestation.json")]
    attestation: String,

    #[arg(short, long)]
    config: Option<String>,
}

#[derive(Debug, clap::Args)]
#[command(author, version, long_about = None,
    about = "Check whether the supplied hostData is trusted by a join policy")]
struct CheckPolicyArgs {
    #[arg(short, long, default_value = "policy.json")]
    policy: String,

    #[arg(long)]
    host_data: String,
}

#[derive(Debug, clap::Args)]
#[command(author, version, long_about = None,
    about = "Unwrap a response message with the caller's private key")]
struct UnwrapArgs {
    #[arg(short, long, default_value = "key.pem")]
    key: String,

    #[arg(short, long, default_value = "message.json")]
    message: String,
}

fn main() {
    env_logger::init();

    match SnpRecoveryCli::parse() {
        SnpRecoveryCli::Verify(args) => match verify(&args) {
            Ok(claims) => println!("{claims}"),
            Err(e) => eprintln!("verification failed: {e}"),
        },

        SnpRecoveryCli::CheckPolicy(args) => match check_policy(&args) {
            Ok(()) => println!("hostData is trusted"),
            Err(e) => eprintln!("policy check failed: {e}"),
        },

        SnpRecoveryCli::Unwrap(args) => match unwrap(&args) {
            Ok(msg) => println!("{msg}"),
            Err(e) => eprintln!("unwrap failed: {e}"),
        },
    }
}

fn load_config(path: &Option<String>) -> Result<Config, Box<dyn Error>> {
    let cfg = match path {
        Some(p) => Config::load_json(&fs::read_to_string(p)?)?,
        None => Config::default(),
    };

    Ok(cfg.with_env()?)
}

fn verify(args: &VerifyArgs) -> Result<String, Box<dyn Error>> {
    let cfg = load_config(&args.config)?;

    let j = fs::read_to_string(&args.attestation)?;
    let evidence: AttestationEvidence = serde_json::from_str(&j)?;

    let claims = AttestationVerifier::from_config(&cfg).verify(&evidence)?;

    Ok(serde_json::to_string_pretty(&claims)?)
}

fn check_policy(args: &CheckPolicyArgs) -> Result<(), Box<dyn Error>> {
    let policy = JoinPolicy::from_json(&fs::read(&args.policy)?)?;
    let host_data: HostData = args.host_data.parse()?;

    if !policy.contains(&host_data) {
        return Err(format!("{host_data} is not in the join policy").into());
    }

    Ok(())
}

fn unwrap(args: &UnwrapArgs) -> Result<String, Box<dyn Error>> {
    let key = PKey::private_key_from_pem(&fs::read(&args.key)?)?;

    let j = fs::read_to_string(&args.message)?;
    let resp: WrappedResponse = serde_json::from_str(&j)?;

    let msg = unwrap_response(&resp, &key)?;

    Ok(match String::from_utf8(msg) {
        Ok(s) => s,
        Err(e) => hex::encode(e.into_bytes()),
    })
}
