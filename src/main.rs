use std::process::exit;

#[tokio::main]
async fn main() {
    match pachhub::run().await {
        Err(error) => {
            eprintln!("{:?}", error);
            exit(1);
        }
        Ok(0) => (),
        Ok(code) => exit(code),
    };
}
