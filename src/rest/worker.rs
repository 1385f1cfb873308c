// This file is part of LATTICE.
//
// Copyright (C) 2022 Affidaty Spa.
//
// LATTICE is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// LATTICE is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with LATTICE. If not, see <https://www.gnu.org/licenses/>.

//! HTTP worker.
//!
//! Thin adapter over the service request channels. Binary endpoints move
//! packed structures in and out of the blockchain service, the JSON-RPC
//! endpoint drives the network service peer management.

use crate::{
    base::serialize::{rmp_deserialize, rmp_serialize},
    blockchain::{BlockRequestSender, Message},
    crypto::Hash,
    Error, ErrorKind, Result, VERSION,
};
use serde_json::{json, Value};
use tide::{http::mime, Request, Response, StatusCode};

const RPC_PARSE_ERROR: i64 = -32700;
const RPC_METHOD_NOT_FOUND: i64 = -32601;
const RPC_INVALID_PARAMS: i64 = -32602;
const RPC_INTERNAL_ERROR: i64 = -32603;

/// Conversion from "core" errors to HTTP errors.
impl From<ErrorKind> for StatusCode {
    fn from(err: ErrorKind) -> StatusCode {
        use crate::error::ErrorKind::*;
        match err {
            MalformedData => StatusCode::BadRequest,
            InvalidSignature => StatusCode::Unauthorized,
            DuplicatedUnconfirmedTx | DuplicatedConfirmedTx => StatusCode::Conflict,
            ResourceNotFound | ClientNotFound => StatusCode::NotFound,
            RefBlockExpired | RefBlockInvalid | FutureRefBlock => StatusCode::BadRequest,
            UnlinkableBlock => StatusCode::Conflict,
            SmartContractFault => StatusCode::BadRequest,
            CertificateFault | PrivateKeyFault => StatusCode::Unauthorized,
            DatabaseFault | ServerConfigurationFault => StatusCode::InternalServerError,
            Network(_) => StatusCode::BadGateway,
            NotImplemented => StatusCode::NotImplemented,
            Other => StatusCode::ImATeapot,
        }
    }
}

impl From<Error> for Response {
    fn from(err: Error) -> Self {
        let status: StatusCode = err.kind.into();
        Response::builder(status)
            .content_type(mime::BYTE_STREAM)
            .build()
    }
}

/// Channels shared with the route handlers.
#[derive(Clone)]
struct WorkerState {
    /// To send requests to the blockchain service.
    bc_chan: BlockRequestSender,
    /// To send peer management requests to the network service.
    net_chan: BlockRequestSender,
}

// WARNING: Every message that we are sending is a CONFIRMED message (i.e. a response is expected).
// There is the strong assumption that the service at the other end of the channel is going to
// reply to our requests. A missing reply is going to block the receiver "forever".
// Maybe in the future is better to use the `recv_timeout` function?.
async fn send_recv(chan: &BlockRequestSender, request: Message) -> Result<Message> {
    let chan = chan.clone();

    let receiver = chan
        .send(request)
        .await
        .map_err(|_err| Error::new_ext(ErrorKind::Other, "service seems down"))?;

    receiver
        .recv()
        .await
        .map_err(|_err| Error::new_ext(ErrorKind::Other, "service seems down"))
}

fn tide_result(result: Result<Vec<u8>>) -> tide::Result {
    let (body, status) = match result {
        Ok(buf) => (buf, StatusCode::Ok),
        Err(err) => {
            let buf = err.to_string_full().as_bytes().to_vec();
            (buf, err.kind.into())
        }
    };
    let response = Response::builder(status)
        .body(body)
        .content_type(mime::BYTE_STREAM)
        .build();
    Ok(response)
}

async fn message_handler(mut req: Request<WorkerState>) -> tide::Result {
    let body = req.body_bytes().await?;
    let res = match send_recv(&req.state().bc_chan, Message::Packed { buf: body }).await? {
        Message::Packed { buf } => Ok(buf),
        _ => Err(Error::new_ext(
            ErrorKind::Other,
            "unexpected response from block service",
        )),
    };
    tide_result(res)
}

async fn put_transaction(mut req: Request<WorkerState>) -> tide::Result {
    let body = req.body_bytes().await?;
    let tx = rmp_deserialize(&body)?;
    let bc_req = Message::PutTransactionRequest { confirm: true, tx };
    let bc_res = match send_recv(&req.state().bc_chan, bc_req).await? {
        Message::PutTransactionResponse { hash } => Ok(hash.to_bytes()),
        Message::Exception(err) => Err(err),
        _ => Err(Error::new_ext(
            ErrorKind::Other,
            "unexpected response from block service",
        )),
    };
    tide_result(bc_res)
}

async fn get_transaction(req: Request<WorkerState>) -> tide::Result {
    let ticket = req.param("0").unwrap_or_default();
    let hash = Hash::from_hex(ticket).unwrap_or_default();
    let bc_req = Message::GetTransactionRequest { hash };
    let res = match send_recv(&req.state().bc_chan, bc_req).await? {
        Message::GetTransactionResponse { tx } => rmp_serialize(&tx),
        Message::Exception(err) => Err(err),
        _ => Err(Error::new_ext(
            ErrorKind::Other,
            "unexpected response from block service",
        )),
    };
    tide_result(res)
}

async fn get_receipt(req: Request<WorkerState>) -> tide::Result {
    let ticket = req.param("0").unwrap_or_default();
    let hash = Hash::from_hex(ticket).unwrap_or_default();
    let bc_req = Message::GetReceiptRequest { hash };
    let res = match send_recv(&req.state().bc_chan, bc_req).await? {
        Message::GetReceiptResponse { rx } => rmp_serialize(&rx),
        Message::Exception(err) => Err(err),
        _ => Err(Error::new_ext(
            ErrorKind::Other,
            "unexpected response from block service",
        )),
    };
    tide_result(res)
}

async fn get_block(req: Request<WorkerState>) -> tide::Result {
    let height = req.param("0").unwrap_or_default();
    let height = height.parse::<u64>().unwrap_or_default();
    let bc_req = Message::GetBlockRequest { height, txs: false };
    let res = match send_recv(&req.state().bc_chan, bc_req).await? {
        Message::GetBlockResponse { block, .. } => rmp_serialize(&block),
        Message::Exception(err) => Err(err),
        _ => Err(Error::new_ext(
            ErrorKind::Other,
            "unexpected response from block service",
        )),
    };
    tide_result(res)
}

async fn get_chain_info(req: Request<WorkerState>) -> tide::Result {
    let res = match send_recv(&req.state().bc_chan, Message::GetChainInfoRequest).await? {
        Message::GetChainInfoResponse { info } => rmp_serialize(&info),
        Message::Exception(err) => Err(err),
        _ => Err(Error::new_ext(
            ErrorKind::Other,
            "unexpected response from block service",
        )),
    };
    tide_result(res)
}

async fn get_round(req: Request<WorkerState>) -> tide::Result {
    let number = req.param("0").unwrap_or_default();
    let number = number.parse::<u64>().unwrap_or_default();
    let bc_req = Message::GetRoundRequest { number };
    let res = match send_recv(&req.state().bc_chan, bc_req).await? {
        Message::GetRoundResponse { round } => rmp_serialize(&round),
        Message::Exception(err) => Err(err),
        _ => Err(Error::new_ext(
            ErrorKind::Other,
            "unexpected response from block service",
        )),
    };
    tide_result(res)
}

/// JSON-RPC request envelope.
#[derive(Deserialize)]
struct RpcRequest {
    /// Method name.
    method: String,
    /// Method parameters, one object per method.
    #[serde(default)]
    params: Value,
    /// Opaque request identifier, returned verbatim.
    #[serde(default)]
    id: Value,
}

fn rpc_result(id: Value, result: Value) -> tide::Result {
    let body = json!({ "jsonrpc": "2.0", "result": result, "id": id });
    let response = Response::builder(StatusCode::Ok).body(body).build();
    Ok(response)
}

fn rpc_error(id: Value, code: i64, message: &str) -> tide::Result {
    let body = json!({ "jsonrpc": "2.0", "error": { "code": code, "message": message }, "id": id });
    let response = Response::builder(StatusCode::Ok).body(body).build();
    Ok(response)
}

/// Translation of a network service reply into a JSON-RPC response.
fn rpc_net_result(id: Value, res: Result<Message>, key: &str) -> tide::Result {
    match res {
        Ok(Message::AddPeerResponse { added }) => rpc_result(id, json!({ key: added })),
        Ok(Message::RemovePeerResponse { removed }) => rpc_result(id, json!({ key: removed })),
        Ok(Message::GetPeersResponse { peers }) => rpc_result(id, json!({ key: peers })),
        Ok(Message::Exception(err)) => rpc_error(id, RPC_INTERNAL_ERROR, &err.to_string_full()),
        Ok(_) => rpc_error(id, RPC_INTERNAL_ERROR, "unexpected response from network service"),
        Err(err) => rpc_error(id, RPC_INTERNAL_ERROR, &err.to_string_full()),
    }
}

async fn rpc_handler(mut req: Request<WorkerState>) -> tide::Result {
    let body = req.body_bytes().await?;
    let rpc: RpcRequest = match serde_json::from_slice(&body) {
        Ok(rpc) => rpc,
        Err(_err) => return rpc_error(Value::Null, RPC_PARSE_ERROR, "parse error"),
    };
    let id = rpc.id;
    let net_chan = &req.state().net_chan;

    match rpc.method.as_str() {
        "AddPeer" => {
            let address = match rpc.params.get("address").and_then(Value::as_str) {
                Some(address) => address.to_owned(),
                None => return rpc_error(id, RPC_INVALID_PARAMS, "missing 'address' parameter"),
            };
            let res = send_recv(net_chan, Message::AddPeerRequest { address }).await;
            rpc_net_result(id, res, "added")
        }
        "RemovePeer" => {
            let address = match rpc.params.get("address").and_then(Value::as_str) {
                Some(address) => address.to_owned(),
                None => return rpc_error(id, RPC_INVALID_PARAMS, "missing 'address' parameter"),
            };
            let res = send_recv(net_chan, Message::RemovePeerRequest { address }).await;
            rpc_net_result(id, res, "removed")
        }
        "GetPeers" => {
            let res = send_recv(net_chan, Message::GetPeersRequest).await;
            rpc_net_result(id, res, "peers")
        }
        _ => rpc_error(id, RPC_METHOD_NOT_FOUND, "method not found"),
    }
}

async fn get_index(_req: Request<WorkerState>) -> tide::Result {
    Ok(format!("LATTICE v{}", VERSION).into())
}

pub fn run(addr: String, port: u16, bc_chan: BlockRequestSender, net_chan: BlockRequestSender) {
    let state = WorkerState { bc_chan, net_chan };
    let mut app = tide::with_state(state);

    app.at("/api/v1/message").post(message_handler);
    app.at("/api/v1/submit").post(put_transaction);
    app.at("/api/v1/transaction/:0").get(get_transaction);
    app.at("/api/v1/receipt/:0").get(get_receipt);
    app.at("/api/v1/block/:0").get(get_block);
    app.at("/api/v1/chain").get(get_chain_info);
    app.at("/api/v1/round/:0").get(get_round);
    app.at("/api/v1/rpc").post(rpc_handler);
    app.at("/").get(get_index);

    let fut = app.listen((addr, port));
    async_std::task::block_on(fut).unwrap();
}
