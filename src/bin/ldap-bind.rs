use ldap_bind::client;
use ldap_bind::config::ClientConfig;
use tracing_subscriber::EnvFilter;

async fn bind(address: String, dn: String, password: String) -> ldap_bind::Result<()> {
    let connection = client::connect(ClientConfig::new(address)).await?;
    let res = connection.bind_simple(&dn, &password).await?;
    println!(
        "result: {:?} ({}) {}",
        res.result,
        res.result.code(),
        res.diagnostic_message
    );
    connection.unbind().await
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [address, dn, password]: [String; 3] = match args.try_into() {
        Ok(args) => args,
        Err(_) => {
            eprintln!("usage: ldap-bind <host:port> <dn> <password>");
            std::process::exit(2);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    runtime.block_on(async {
        if let Err(e) = bind(address, dn, password).await {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    });
}
