//! Run a few submissions through the pipeline and print each response

use pysprinter::{Handler, Request};
use serde_json::json;

fn main() -> pysprinter::Result<()> {
    tracing_subscriber::fmt::init();

    let handler = Handler::new()?;

    println!("=== pysprinter demo ===");

    println!("\nExample 1: return a value");
    show(&handler, Request::new("def my_function():\n    return 3\n"))?;

    println!("\nExample 2: arguments and stdout");
    show(
        &handler,
        Request::new("def my_function(a, b=0):\n    print(\"adding\", a, \"and\", b)\n    return a + b\n")
            .with_arg(json!(2))
            .with_kwarg("b", json!(5)),
    )?;

    println!("\nExample 3: a raised error");
    show(
        &handler,
        Request::new("def my_function():\n    raise ValueError(\"bad\")\n"),
    )?;

    println!("\nExample 4: contract violation");
    show(&handler, Request::new("x = 1\n"))?;

    Ok(())
}

fn show(handler: &Handler, request: Request) -> pysprinter::Result<()> {
    let response = handler.handle(&request)?;
    println!("  status: {}", response.status_code);
    if let Some(value) = &response.eval_output {
        println!("  eval_output: {value}");
    }
    for line in response.stdout.iter().flatten() {
        println!("  stdout: {line}");
    }
    if let Some(error) = &response.error {
        println!("  error: {error}");
    }
    Ok(())
}
