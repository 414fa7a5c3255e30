// The wire messages are declared by hand in `src/mr/rpc.rs`, so only the
// service stubs are generated here and no protoc is needed.
fn main() {
    let method = |name: &str, route: &str, input: &str, output: &str| {
        tonic_build::manual::Method::builder()
            .name(name)
            .route_name(route)
            .input_type(format!("crate::mr::rpc::{input}"))
            .output_type(format!("crate::mr::rpc::{output}"))
            .codec_path("tonic::codec::ProstCodec")
            .build()
    };

    let master = tonic_build::manual::Service::builder()
        .name("Master")
        .package("mr")
        .method(method("register", "Register", "RegisterRequest", "RegisterReply"))
        .method(method("poll", "Poll", "PollRequest", "PollReply"))
        .method(method("report", "Report", "ReportRequest", "ReportReply"))
        .method(method("goodbye", "Goodbye", "GoodbyeRequest", "Ack"))
        .build();

    tonic_build::manual::Builder::new().compile(&[master]);
}
