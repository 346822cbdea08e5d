use pb_ai::{
    build_message, BridgeConfig, DescriptorReference, DiscoveryPolicy, ParsedToolCall, SchemaConfiguration,
    ToolBridge, ToolSet, ToolSetOptions,
};
use pb_core::{Error, Tool, ToolCall};
use pb_reflect::testing;
use serde_json::{json, Map, Value as Json};

fn bridge() -> ToolBridge {
    ToolBridge::new(testing::library_schema())
}

fn args(value: Json) -> Map<String, Json> {
    match value {
        Json::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn method(name: &str) -> DescriptorReference {
    DescriptorReference::Method(format!("{}.{name}", testing::LIBRARY_SERVICE))
}

fn library_set(bridge: &ToolBridge) -> ToolSet {
    bridge
        .create_service_tool_set(testing::LIBRARY_SERVICE, &ToolSetOptions::default())
        .unwrap()
}

fn tool<'a>(set: &'a ToolSet, name: &str) -> &'a Tool {
    set.tools.iter().find(|tool| tool.name == name).unwrap()
}

#[test]
fn test_parsed_requests_match_directly_built_messages() {
    let bridge = bridge();
    let cases = [
        ("CreateBook", json!({"parent": "shelves/1", "book": {"title": "Dune", "genre": "SCIENCE_FICTION"}})),
        ("GetBook", json!({"name": "shelves/1/books/2"})),
        ("UpdateBook", json!({"book": {"name": "shelves/1/books/2", "page_count": 412}, "update_mask": "page_count"})),
        ("ListBooks", json!({"parent": "shelves/1", "page_size": 10, "order_by": "title"})),
        ("DeleteBook", json!({"name": "shelves/1/books/2"})),
        ("SummarizeBook", json!({"name": "shelves/1/books/3"})),
    ];

    for (name, arguments) in cases {
        let tool = bridge.create_tool(&method(name), &SchemaConfiguration::default()).unwrap();
        let call = ToolCall::for_tool(&tool, "call-1", args(arguments.clone()));

        let ParsedToolCall::RpcRequest(rpc) = bridge.parse_tool_call(&call, &[]).unwrap() else {
            panic!("{name} did not parse as a method request");
        };
        let input = bridge
            .schema()
            .find_method(&format!("{}.{name}", testing::LIBRARY_SERVICE))
            .unwrap()
            .input();
        let direct = build_message(&input, &args(arguments)).unwrap();

        assert_eq!(rpc.request, direct, "{name}");
        assert_eq!(rpc.service, testing::LIBRARY_SERVICE);
        assert_eq!(rpc.method, format!("{}.{name}", testing::LIBRARY_SERVICE));
        assert!(rpc.read_mask.is_none());
    }
}

#[test]
fn test_generate_message_tool_round_trip() {
    let bridge = bridge();
    let tool = bridge
        .create_tool(
            &DescriptorReference::Message("library.v1.Author".into()),
            &SchemaConfiguration::default(),
        )
        .unwrap();
    let call = ToolCall::for_tool(&tool, "call-1", args(json!({"display_name": "Frank Herbert"})));

    let ParsedToolCall::Message(message) = bridge.parse_tool_call(&call, &[]).unwrap() else {
        panic!("expected a message");
    };
    assert_eq!(message.to_json(), json!({"display_name": "Frank Herbert"}));
}

#[test]
fn test_calls_parse_on_any_bridge_over_the_same_schema() {
    let tool = bridge().create_tool(&method("GetBook"), &SchemaConfiguration::default()).unwrap();
    let call = ToolCall::for_tool(&tool, "call-1", args(json!({"name": "shelves/1/books/2"})));

    let other = ToolBridge::new(testing::library_schema());
    assert!(matches!(
        other.parse_tool_call(&call, &[]).unwrap(),
        ParsedToolCall::RpcRequest(_)
    ));
}

#[test]
fn test_generation_mask_drops_fields_outside_it() {
    let bridge = bridge();
    let config = SchemaConfiguration {
        field_mask_paths: vec!["book.title".into()],
        ..Default::default()
    };
    let tool = bridge.create_tool(&method("CreateBook"), &config).unwrap();
    assert!(tool.json_schema.property("parent").is_none());
    assert!(tool.json_schema.property("book.isbn").is_none());

    let call = ToolCall::for_tool(
        &tool,
        "call-1",
        args(json!({"parent": "shelves/1", "book": {"title": "Dune", "isbn": "9780441013593"}})),
    );
    let ParsedToolCall::RpcRequest(rpc) = bridge.parse_tool_call(&call, &[]).unwrap() else {
        panic!("expected a method request");
    };
    assert_eq!(rpc.request.to_json(), json!({"book": {"title": "Dune"}}));
}

#[test]
fn test_response_read_mask_is_parsed_and_validated() {
    let bridge = bridge();
    let config = SchemaConfiguration {
        response_read_mask: true,
        ..Default::default()
    };
    let tool = bridge.create_tool(&method("GetBook"), &config).unwrap();

    let call = ToolCall::for_tool(
        &tool,
        "call-1",
        args(json!({"name": "shelves/1/books/2", "response_read_mask": "title, author.display_name"})),
    );
    let ParsedToolCall::RpcRequest(rpc) = bridge.parse_tool_call(&call, &[]).unwrap() else {
        panic!("expected a method request");
    };
    assert_eq!(rpc.read_mask.unwrap().to_string(), "author.display_name,title");
    assert_eq!(rpc.request.to_json(), json!({"name": "shelves/1/books/2"}));

    let bad = ToolCall::for_tool(
        &tool,
        "call-2",
        args(json!({"name": "shelves/1/books/2", "response_read_mask": "shelf_name"})),
    );
    let err = bridge.parse_tool_call(&bad, &[]).unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);
}

#[test]
fn test_calls_without_usable_annotations_are_rejected() {
    let bridge = bridge();
    let bare = ToolCall {
        id: "call-1".into(),
        name: "GetBook".into(),
        ..Default::default()
    };
    assert_eq!(
        bridge.parse_tool_call(&bare, &[]).unwrap_err().code(),
        tonic::Code::InvalidArgument
    );

    let mut unknown = bare.clone();
    unknown.annotations.insert("tool-type".into(), "shell".into());
    assert_eq!(
        bridge.parse_tool_call(&unknown, &[]).unwrap_err().code(),
        tonic::Code::InvalidArgument
    );
}

#[test]
fn test_mismatched_arguments_are_invalid() {
    let bridge = bridge();
    let tool = bridge.create_tool(&method("ListBooks"), &SchemaConfiguration::default()).unwrap();
    let call = ToolCall::for_tool(&tool, "call-1", args(json!({"page_size": "ten"})));
    let err = bridge.parse_tool_call(&call, &[]).unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);
    assert!(err.message().contains("page_size"));
}

// ── Discovery ──

#[test]
fn test_discovery_flow_reveals_and_unlocks_tools() {
    let bridge = bridge();
    let mut set = library_set(&bridge);
    let get = ToolCall::for_tool(tool(&set, "GetBook"), "call-1", args(json!({"name": "shelves/1/books/2"})));

    let err = bridge.parse_tool_call(&get, std::slice::from_ref(&set)).unwrap_err();
    assert_eq!(err.code(), tonic::Code::FailedPrecondition);

    let discover = ToolCall::for_tool(&set.discovery_tool, "call-2", args(json!({"tools": ["GetBook"]})));
    let ParsedToolCall::Discovery(discovery) = bridge.parse_tool_call(&discover, std::slice::from_ref(&set)).unwrap()
    else {
        panic!("expected a discovery call");
    };
    assert_eq!(discovery.tool_set_name, testing::LIBRARY_SERVICE);
    assert_eq!(discovery.tool_names, ["GetBook"]);

    set.discover(&discovery.tool_names).unwrap();
    assert!(matches!(
        bridge.parse_tool_call(&get, std::slice::from_ref(&set)).unwrap(),
        ParsedToolCall::RpcRequest(_)
    ));
}

#[test]
fn test_discovery_of_listed_and_unlisted_names() {
    let bridge = bridge();
    let tools: Vec<Tool> = ["m1", "m2", "m3"]
        .into_iter()
        .map(|name| Tool {
            name: name.into(),
            ..Default::default()
        })
        .collect();
    let discovery_tool = ToolBridge::create_discovery_tool("Methods_Discover", "", &tools);
    let set = ToolSet::new("methods", discovery_tool.clone(), tools);

    let listed = ToolCall::for_tool(&discovery_tool, "call-1", args(json!({"tools": ["m1", "m2"]})));
    assert!(bridge.parse_tool_call(&listed, std::slice::from_ref(&set)).is_ok());

    let unlisted = ToolCall::for_tool(&discovery_tool, "call-2", args(json!({"tools": ["m9"]})));
    let err = bridge.parse_tool_call(&unlisted, std::slice::from_ref(&set)).unwrap_err();
    assert_eq!(err.code(), tonic::Code::NotFound);
    assert_eq!(err.message(), "tool \"m9\" not found in tool set");
}

#[test]
fn test_discovery_call_needs_its_tool_set() {
    let bridge = bridge();
    let set = library_set(&bridge);
    let discover = ToolCall::for_tool(&set.discovery_tool, "call-1", args(json!({"tools": ["GetBook"]})));
    let err = bridge.parse_tool_call(&discover, &[]).unwrap_err();
    assert_eq!(err.code(), tonic::Code::NotFound);
}

#[test]
fn test_rediscovery_under_each_policy() {
    let idempotent = bridge();
    let mut set = library_set(&idempotent);
    set.discover(&["GetBook".to_string()]).unwrap();
    let discover = ToolCall::for_tool(&set.discovery_tool, "call-1", args(json!({"tools": ["GetBook"]})));
    assert!(idempotent.parse_tool_call(&discover, std::slice::from_ref(&set)).is_ok());

    let strict = ToolBridge::with_config(
        testing::library_schema(),
        BridgeConfig {
            discovery_policy: DiscoveryPolicy::Strict,
            ..Default::default()
        },
    );
    let err = strict.parse_tool_call(&discover, std::slice::from_ref(&set)).unwrap_err();
    assert_eq!(err.code(), tonic::Code::AlreadyExists);
    assert!(matches!(err, Error::AlreadyExists { .. }));
    let result = err.tool_result().unwrap();
    assert!(result.is_error());
    assert_eq!(result.tool_call_id, "call-1");
    assert_eq!(result.tool_name, set.discovery_tool.name);
}

#[test]
fn test_tool_set_survives_a_trip_through_the_client() {
    let bridge = bridge();
    let mut set = library_set(&bridge);
    set.discover(&["ListBooks".to_string(), "GetBook".to_string()]).unwrap();

    let carried: ToolSet = serde_json::from_str(&serde_json::to_string(&set).unwrap()).unwrap();
    let names: Vec<String> = carried.get_tools().into_iter().map(|tool| tool.name).collect();
    assert_eq!(names, ["ListBooks", "GetBook", "LibraryService_Discover"]);

    let get = ToolCall::for_tool(tool(&carried, "GetBook"), "call-1", args(json!({"name": "shelves/1/books/2"})));
    assert!(bridge.parse_tool_call(&get, &[carried]).is_ok());
}
