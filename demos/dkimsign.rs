use dkim_signer::{EmailMessage, HeaderSelection, SignRequest, Signer};
use std::{env, process};
use tokio::{
    fs,
    io::{self, AsyncReadExt},
};

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut args = env::args();

    let (key_file, domain, selector) = match (
        args.next().as_deref(),
        args.next(),
        args.next(),
        args.next(),
        args.next(),
    ) {
        (_, Some(key_file), Some(domain), Some(selector), None) => (key_file, domain, selector),
        (program, ..) => {
            eprintln!("usage: {} <key_file> <domain> <selector>", program.unwrap_or("dkimsign"));
            process::exit(1);
        }
    };

    let key = fs::read(key_file).await.unwrap();

    let mut request = SignRequest::new(selector, domain, key, HeaderSelection::Auto);
    request.format.line_width = 78.try_into().ok();

    let mut msg = Vec::new();
    let n = io::stdin().read_to_end(&mut msg).await.unwrap();
    assert!(n > 0, "empty message on stdin");

    let mut message = EmailMessage::parse(msg);

    let signer = Signer::new(request);

    match signer.add_signature_to_message(&mut message) {
        Ok(()) => {
            let output = String::from_utf8_lossy(&message.to_bytes()).replace("\r\n", "\n");
            print!("{output}");
        }
        Err(e) => {
            eprintln!("ERROR: {e}");
            process::exit(1);
        }
    }
}
